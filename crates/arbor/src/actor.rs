//! # Actor and Behavior Traits
//!
//! [`Actor`] is the contract every actor type implements. Only
//! [`Actor::receive`] is required; every lifecycle hook has a no-op default, so an
//! actor overrides just the moments it cares about.
//!
//! ## Hook order
//!
//! | Situation | Hooks |
//! |-----------|-------|
//! | Fresh start | `pre_start` |
//! | Fresh start with a [`persistence_id`](Actor::persistence_id) | `recover` (if a snapshot exists), `post_recovery`, `pre_start` |
//! | Restart by the parent | `recover` and `post_recovery` for persistent actors, then `pre_restart(cause)` on the *new* instance |
//! | Resume by the parent | `on_resume` |
//! | Dead-man's handle fired | `dying`, then the normal stop |
//! | Stop | `post_stop` (skipped on restart) |
//!
//! A failing start hook is fatal for the actor: it is reported to the parent and
//! the actor stops without processing a single message.
//!
//! ## Behaviors
//!
//! `receive` is the initial behavior. An actor can switch to another
//! [`Behavior`] at runtime with [`Context::become_behavior`] and friends; the
//! behavior gets mutable access to the actor's state.
//!
//! ```rust
//! use arbor::{async_trait, Actor, ActorError, Behavior, Context, Payload};
//!
//! struct Door { opened: u32 }
//!
//! #[derive(Debug)] struct Open;
//! #[derive(Debug)] struct Close;
//!
//! struct Opened;
//!
//! #[async_trait]
//! impl Behavior<Door> for Opened {
//!     async fn receive(&self, _door: &mut Door, msg: Payload, ctx: &mut Context<Door>) -> Result<(), ActorError> {
//!         if msg.is::<Close>() {
//!             ctx.unbecome()?;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl Actor for Door {
//!     async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError> {
//!         if msg.is::<Open>() {
//!             self.opened += 1;
//!             ctx.stash_become(Opened);
//!         }
//!         Ok(())
//!     }
//! }
//! ```

use crate::context::Context;
use crate::error::ActorError;
use crate::message::Payload;
use async_trait::async_trait;

#[async_trait]
pub trait Actor: Send + Sized + 'static {
    /// The initial behavior.
    async fn receive(&mut self, msg: Payload, ctx: &mut Context<Self>) -> Result<(), ActorError>;

    async fn pre_start(&mut self, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called instead of `pre_start` on an instance created by a supervised restart.
    async fn pre_restart(
        &mut self,
        _cause: &ActorError,
        _ctx: &mut Context<Self>,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    /// Cleanup. Runs on stop even when the actor failed (see [`Context::failed`]).
    /// Errors are logged and otherwise ignored.
    async fn post_stop(&mut self, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        Ok(())
    }

    async fn on_resume(&mut self, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        Ok(())
    }

    /// Last words before a dead-man's handle stops the actor.
    async fn dying(&mut self, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        Ok(())
    }

    /// Opt into snapshot recovery by returning a stable id.
    fn persistence_id(&self) -> Option<String> {
        None
    }

    /// Receives the stored snapshot, if there is one.
    async fn recover(
        &mut self,
        _snapshot: serde_json::Value,
        _ctx: &mut Context<Self>,
    ) -> Result<(), ActorError> {
        Ok(())
    }

    async fn post_recovery(&mut self, _ctx: &mut Context<Self>) -> Result<(), ActorError> {
        Ok(())
    }
}

/// A swappable message handler for actor type `A`.
#[async_trait]
pub trait Behavior<A: Actor>: Send + Sync + 'static {
    async fn receive(&self, actor: &mut A, msg: Payload, ctx: &mut Context<A>)
        -> Result<(), ActorError>;
}
