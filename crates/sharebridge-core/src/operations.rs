//! Typed operations with three entry points sharing one implementation:
//! `run().await`, `enqueue(&mut batch)` and `run_blocking()`.

use crate::batch::{Batch, CallHandle};
use crate::call::{build_call, build_navigation_get, ActionCall, ApiCall, CallTarget, Operation};
use crate::context::Context;
use crate::entity::{self, EntityModel, EntityRef, ModelCollection, Navigation};
use crate::error::{BridgeError, BridgeResult};
use crate::materializer;
use crate::types::{Dialect, Payload, ResponseEntry};
use log::debug;
use tokio_util::sync::CancellationToken;

type Continuation<T> = Box<dyn FnOnce(BridgeResult<ResponseEntry>) -> BridgeResult<T> + Send>;

enum Plan<T> {
    Remote {
        call: ApiCall,
        continuation: Continuation<T>,
    },
    Done(BridgeResult<T>),
}

/// A built call waiting for an execution style.
pub struct PreparedCall<T> {
    context: Option<Context>,
    plan: Plan<T>,
}

impl<T: Send + 'static> PreparedCall<T> {
    pub fn new<F>(context: Option<Context>, call: ApiCall, continuation: F) -> Self
    where
        F: FnOnce(BridgeResult<ResponseEntry>) -> BridgeResult<T> + Send + 'static,
    {
        Self {
            context,
            plan: Plan::Remote {
                call,
                continuation: Box::new(continuation),
            },
        }
    }

    /// Already resolved: no request is needed, or building failed.
    pub fn done(context: Option<Context>, result: BridgeResult<T>) -> Self {
        Self {
            context,
            plan: Plan::Done(result),
        }
    }

    /// Build `operation` on `target`, failing without I/O if that is impossible.
    ///
    /// `make` receives the chosen dialect and returns the continuation.
    fn build<F, M>(context: Option<Context>, target: &CallTarget, operation: Operation, make: M) -> Self
    where
        M: FnOnce(Dialect) -> F,
        F: FnOnce(BridgeResult<ResponseEntry>) -> BridgeResult<T> + Send + 'static,
    {
        let Some(ctx) = context else {
            return Self::done(None, Err(detached()));
        };
        match build_call(target, operation, ctx.config()) {
            Ok(call) => {
                let continuation = make(call.dialect());
                Self::new(Some(ctx), call, continuation)
            }
            Err(e) => Self::done(Some(ctx), Err(e)),
        }
    }

    pub fn call(&self) -> Option<&ApiCall> {
        match &self.plan {
            Plan::Remote { call, .. } => Some(call),
            Plan::Done(_) => None,
        }
    }

    /// Send immediately as a single request.
    pub async fn run(self) -> BridgeResult<T> {
        self.run_with_cancel(&CancellationToken::new()).await
    }

    pub async fn run_with_cancel(self, cancel: &CancellationToken) -> BridgeResult<T> {
        match self.plan {
            Plan::Done(result) => result,
            Plan::Remote { call, continuation } => {
                let ctx = self.context.ok_or_else(detached)?;
                let response = ctx.executor().send_single(call, cancel).await;
                continuation(response)
            }
        }
    }

    /// Queue on `batch`; the handle resolves when the batch executes.
    pub fn enqueue(self, batch: &mut Batch) -> BridgeResult<CallHandle<T>> {
        match self.plan {
            Plan::Done(Ok(value)) => Ok(CallHandle::ready(Ok(value))),
            Plan::Done(Err(e)) => Err(e),
            Plan::Remote { call, continuation } => batch.add(call, continuation),
        }
    }

    /// Queue on the context's current batch.
    pub fn enqueue_current(self) -> BridgeResult<CallHandle<T>> {
        let ctx = self.context.clone().ok_or_else(detached)?;
        let mut batch = ctx.current_batch();
        self.enqueue(&mut batch)
    }

    /// Run from synchronous code on the context's runtime.
    pub fn run_blocking(self) -> BridgeResult<T> {
        match &self.context {
            Some(ctx) => {
                let ctx = ctx.clone();
                ctx.block_on(self.run())?
            }
            None => self.done_result(),
        }
    }

    fn done_result(self) -> BridgeResult<T> {
        match self.plan {
            Plan::Done(result) => result,
            Plan::Remote { .. } => Err(detached()),
        }
    }

    /// Chain a further transformation onto the result.
    pub fn map<U, F>(self, f: F) -> PreparedCall<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> BridgeResult<U> + Send + 'static,
    {
        let plan = match self.plan {
            Plan::Done(result) => Plan::Done(result.and_then(f)),
            Plan::Remote { call, continuation } => Plan::Remote {
                call,
                continuation: Box::new(move |r| continuation(r).and_then(f)),
            },
        };
        PreparedCall {
            context: self.context,
            plan,
        }
    }
}

fn detached() -> BridgeError {
    BridgeError::missing_context("entity is not bound to a context")
}

fn context_of(target: &CallTarget) -> Option<Context> {
    match target {
        CallTarget::Entity(e) => entity::read(e).context().cloned(),
        CallTarget::Collection(c) => c
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .context()
            .cloned(),
    }
}

fn json_of(entry: &ResponseEntry) -> Option<&serde_json::Value> {
    match &entry.payload {
        Payload::Json(v) => Some(v),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Generic operations
// ═══════════════════════════════════════════════════════════════════════

/// Load an entity or collection.
pub fn load(target: CallTarget) -> PreparedCall<()> {
    let context = context_of(&target);
    let apply_to = target.clone();
    PreparedCall::build(context, &target, Operation::Get, move |dialect| move |result| {
        let entry = result?;
        let body = json_of(&entry).ok_or_else(|| BridgeError::serialization("expected a JSON body"))?;
        match &apply_to {
            CallTarget::Entity(e) => materializer::apply(e, body, dialect),
            CallTarget::Collection(c) => materializer::apply_collection(c, body, dialect),
        }
    })
}

/// Create `entity` remotely from its changed fields.
///
/// The entity must already be a member of a collection
/// (see [`materializer::create_in_collection`]). It is detached again only
/// when the remote add fails; a build error leaves it where it is.
pub fn add(entity: &EntityRef) -> PreparedCall<()> {
    let context = entity::read(entity).context().cloned();
    let target = CallTarget::Entity(entity.clone());
    let entity = entity.clone();
    PreparedCall::build(context, &target, Operation::Add, move |dialect| move |result| match result {
        Ok(entry) => {
            if let Some(body) = json_of(&entry).filter(|b| !b.is_null()) {
                materializer::apply(&entity, body, dialect)?;
            }
            entity::write(&entity).clear_changes();
            Ok(())
        }
        Err(e) => {
            materializer::detach(&entity);
            Err(e)
        }
    })
}

/// Send changed fields. No request is made when nothing changed.
pub fn update(entity: &EntityRef) -> PreparedCall<()> {
    let (context, changed) = {
        let guard = entity::read(entity);
        (guard.context().cloned(), guard.has_changes())
    };
    if !changed {
        debug!("update skipped: {} has no changes", entity::read(entity).type_name());
        return PreparedCall::done(context, Ok(()));
    }
    let target = CallTarget::Entity(entity.clone());
    let entity = entity.clone();
    PreparedCall::build(context, &target, Operation::Update, move |dialect| move |result| {
        let entry = result?;
        if let Some(body) = json_of(&entry).filter(|b| !b.is_null()) {
            materializer::apply(&entity, body, dialect)?;
        }
        entity::write(&entity).clear_changes();
        Ok(())
    })
}

/// Delete remotely; on success the entity leaves its collection.
pub fn delete(entity: &EntityRef) -> PreparedCall<()> {
    let context = entity::read(entity).context().cloned();
    let target = CallTarget::Entity(entity.clone());
    let entity = entity.clone();
    PreparedCall::build(context, &target, Operation::Delete, move |_| move |result| {
        result?;
        materializer::detach(&entity);
        Ok(())
    })
}

/// Load the navigation property `name` of `owner` and return its child.
pub fn load_navigation(owner: &EntityRef, name: &str) -> PreparedCall<Navigation> {
    let context = entity::read(owner).context().cloned();
    let Some(ctx) = context else {
        return PreparedCall::done(None, Err(detached()));
    };
    match build_navigation_get(owner, name, ctx.config()) {
        Ok((call, nav)) => {
            let dialect = call.dialect();
            PreparedCall::new(Some(ctx), call, move |result| {
                let entry = result?;
                let body = json_of(&entry).ok_or_else(|| BridgeError::serialization("expected a JSON body"))?;
                match &nav {
                    Navigation::Entity(e) => materializer::apply(e, body, dialect)?,
                    Navigation::Collection(c) => materializer::apply_collection(c, body, dialect)?,
                }
                Ok(nav)
            })
        }
        Err(e) => PreparedCall::done(Some(ctx), Err(e)),
    }
}

/// Invoke a custom action; the raw response is handed back.
pub fn invoke_action(target: CallTarget, action: ActionCall) -> PreparedCall<ResponseEntry> {
    let context = context_of(&target);
    PreparedCall::build(context, &target, Operation::Action(action), |_| |result| result)
}

// ═══════════════════════════════════════════════════════════════════════
//  Typed conveniences
// ═══════════════════════════════════════════════════════════════════════

/// CRUD for every [`EntityModel`].
pub trait EntityOperations: EntityModel {
    fn load(&self) -> PreparedCall<()> {
        load(CallTarget::Entity(self.entity().clone()))
    }

    fn add(&self) -> PreparedCall<()> {
        add(self.entity())
    }

    fn update(&self) -> PreparedCall<()> {
        update(self.entity())
    }

    fn delete(&self) -> PreparedCall<()> {
        delete(self.entity())
    }
}

impl<T: EntityModel> EntityOperations for T {}

impl<T: EntityModel> ModelCollection<T> {
    pub fn load(&self) -> PreparedCall<()> {
        load(CallTarget::Collection(self.collection().clone()))
    }

    /// A new member, created locally; call `add()` on it to persist.
    pub fn create(&self) -> T {
        T::from_ref(materializer::create_in_collection(self.collection()))
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════
