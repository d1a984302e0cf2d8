//! Execution-scoped context propagation.
//!
//! The `context` module provides mechanisms for propagating values across API
//! boundaries and between logically associated execution units. It enables
//! cross-cutting concerns to access their data in-process using a shared
//! context object.
//!
//! # Main Types
//!
//! - [`Context`]: An immutable, execution-scoped collection of values.
//! - [`ContextKey`]: An identity-compared handle under which a value is
//!   stored.
//!

use crate::wire_warn;
use map::ContextMap;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod map;


#[cfg(feature = "futures")]
mod future_ext;

#[cfg(feature = "futures")]
pub use future_ext::{FutureContextExt, SinkContextExt, StreamContextExt, WithContext};

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(0);

/// An opaque handle under which a value can be stored in a [`Context`].
///
/// Keys are compared by identity, not by name: every call to
/// [`ContextKey::new`] produces a distinct key, and two keys constructed with
/// the same debug name never address the same entry. This prevents accidental
/// collisions between unrelated subsystems that happen to pick the same
/// label. Copies of a key all refer to the same logical key.
///
/// Keys are usually stored in statics so that writers and readers of an entry
/// share the same instance.
///
/// # Examples
///
/// ```
/// use tracewire::{Context, ContextKey};
///
/// let key_a = ContextKey::<u64>::new("shared-name");
/// let key_b = ContextKey::<u64>::new("shared-name");
///
/// let cx = Context::new().with_value(&key_a, 1u64);
///
/// // Same name, different identity: `key_b` sees nothing.
/// assert_eq!(cx.get(&key_a), Some(&1));
/// assert_eq!(cx.get(&key_b), None);
/// ```
pub struct ContextKey<T> {
    id: u64,
    name: &'static str,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> ContextKey<T> {
    /// Creates a new key with a fresh identity.
    ///
    /// The `name` is used only for debugging output.
    pub fn new(name: &'static str) -> Self {
        ContextKey {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: PhantomData,
        }
    }

    /// 32-bit identity hash used to place the entry in the trie.
    fn hash(&self) -> u32 {
        ((self.id.wrapping_mul(0x9e37_79b9_7f4a_7c15)) >> 32) as u32
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ContextKey<T> {}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextKey({})", self.name)
    }
}

/// An execution-scoped collection of values.
///
/// A [`Context`] is a propagation mechanism which carries execution-scoped
/// values across API boundaries and between logically associated execution
/// units. Cross-cutting concerns access their data in-process using the same
/// shared context object.
///
/// [`Context`]s are immutable, and their write operations result in the
/// creation of a new context containing the original values and the new
/// specified values; the new context shares all unrelated structure with the
/// original, so deriving a context is cheap and the original remains fully
/// usable by any other holder.
///
/// ## Managing the current context
///
/// Contexts can be associated with the caller's current execution unit on a
/// given thread via the [`attach`] method, and previous contexts can be
/// restored by dropping the returned [`ContextGuard`]. Contexts can be
/// nested, and will restore their parent outer context when detached on drop.
/// To access the values of the context, a snapshot can be created via the
/// [`Context::current`] method.
///
/// [`Context::current`]: Context::current()
/// [`attach`]: Context::attach()
///
/// # Examples
///
/// ```
/// use tracewire::{Context, ContextKey};
///
/// // Keys for application-specific `a` and `b` values
/// let key_a = ContextKey::new("a");
/// let key_b = ContextKey::new("b");
///
/// let _outer_guard = Context::new().with_value(&key_a, "a").attach();
///
/// // Only the `a` value has been set
/// let current = Context::current();
/// assert_eq!(current.get(&key_a), Some(&"a"));
/// assert_eq!(current.get(&key_b), None);
///
/// {
///     let _inner_guard = Context::current_with_value(&key_b, 42u64).attach();
///     // Both values are set in the inner context
///     let current = Context::current();
///     assert_eq!(current.get(&key_a), Some(&"a"));
///     assert_eq!(current.get(&key_b), Some(&42));
/// }
///
/// // Resets to only the `a` value when the inner guard is dropped
/// let current = Context::current();
/// assert_eq!(current.get(&key_a), Some(&"a"));
/// assert_eq!(current.get(&key_b), None);
/// ```
#[derive(Clone, Default)]
pub struct Context {
    entries: ContextMap,
}

impl Context {
    /// Creates the empty root `Context`.
    ///
    /// The root context has no entries and does not allocate; it is the
    /// ancestor of every derived context and the current context whenever
    /// nothing is attached.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns an immutable snapshot of the current thread's context.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::{Context, ContextKey};
    ///
    /// let key_a = ContextKey::new("a");
    ///
    /// let guard = Context::new().with_value(&key_a, "a").attach();
    /// assert_eq!(Context::current().get(&key_a), Some(&"a"));
    /// drop(guard);
    /// ```
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current context returning its value.
    ///
    /// This can be used to build higher performing algebraic expressions for
    /// optionally creating a new context without the overhead of cloning the
    /// current one and dropping it.
    ///
    /// Note: This function will panic if you attempt to attach another
    /// context while the current one is still borrowed.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| cx.borrow().map_current_cx(f))
    }

    /// Returns a clone of the current thread's context with the given value.
    ///
    /// This is a more efficient form of
    /// `Context::current().with_value(key, value)` as it avoids the
    /// intermediate context clone.
    pub fn current_with_value<T: 'static + Send + Sync>(key: &ContextKey<T>, value: T) -> Self {
        Self::map_current(|cx| cx.with_value(key, value))
    }

    /// Returns a reference to the value stored under `key`, if any.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::{Context, ContextKey};
    ///
    /// let key_a = ContextKey::new("a");
    /// let key_b = ContextKey::new("b");
    ///
    /// let cx = Context::new().with_value(&key_a, "a");
    ///
    /// assert_eq!(cx.get(&key_a), Some(&"a"));
    ///
    /// // And returns none if not yet set
    /// assert_eq!(cx.get::<u64>(&key_b), None);
    /// ```
    pub fn get<T: 'static>(&self, key: &ContextKey<T>) -> Option<&T> {
        self.entries.get(key.id, key.hash())?.downcast_ref()
    }

    /// Returns a copy of the context with the new value included.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::{Context, ContextKey};
    ///
    /// let key_a = ContextKey::new("a");
    /// let key_b = ContextKey::new("b");
    ///
    /// // You can create a context with the first value set to "a"
    /// let cx_with_a = Context::new().with_value(&key_a, "a");
    ///
    /// // And create another context based on the first with a new value
    /// let cx_with_a_and_b = cx_with_a.with_value(&key_b, 42u64);
    ///
    /// // The first context is still available and unmodified
    /// assert_eq!(cx_with_a.get(&key_a), Some(&"a"));
    /// assert_eq!(cx_with_a.get::<u64>(&key_b), None);
    ///
    /// // The second context now contains both values
    /// assert_eq!(cx_with_a_and_b.get(&key_a), Some(&"a"));
    /// assert_eq!(cx_with_a_and_b.get(&key_b), Some(&42));
    /// ```
    pub fn with_value<T: 'static + Send + Sync>(&self, key: &ContextKey<T>, value: T) -> Self {
        Context {
            entries: self.entries.insert(key.id, key.hash(), Arc::new(value)),
        }
    }

    /// Replaces the current context on this thread with this context.
    ///
    /// Dropping the returned [`ContextGuard`] will reset the current context
    /// to the previous value. Attaching the context that is already current
    /// returns a guard whose drop is a no-op, leaving the existing
    /// bookkeeping untouched.
    ///
    /// Guards must not be dropped out of order; doing so is detected, logged
    /// as a warning, and otherwise ignored, so misbehaving callers cannot
    /// take down unrelated application code at cleanup time.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::{Context, ContextKey};
    ///
    /// let key_a = ContextKey::new("a");
    /// let my_cx = Context::new().with_value(&key_a, "a");
    ///
    /// // Set the current thread context
    /// let cx_guard = my_cx.attach();
    /// assert_eq!(Context::current().get(&key_a), Some(&"a"));
    ///
    /// // Drop the guard to restore the previous context
    /// drop(cx_guard);
    /// assert_eq!(Context::current().get::<&str>(&key_a), None);
    /// ```
    ///
    /// Guards do not need to be explicitly dropped:
    ///
    /// ```
    /// use tracewire::{Context, ContextKey};
    ///
    /// let key_a = ContextKey::new("a");
    ///
    /// fn my_function(key_a: &tracewire::ContextKey<&'static str>) -> String {
    ///     // attach a context for the duration of this function.
    ///     let my_cx = Context::new().with_value(key_a, "a");
    ///     // NOTE: a variable name after the underscore is **required** or
    ///     // rust will drop the guard, restoring the previous context
    ///     // _immediately_.
    ///     let _guard = my_cx.attach();
    ///
    ///     // anything happening in functions we call can still access my_cx...
    ///
    ///     // returning from the function drops the guard, detaching the
    ///     // context.
    ///     "Hello world".to_owned()
    /// }
    ///
    /// let _ = my_function(&key_a);
    /// ```
    pub fn attach(self) -> ContextGuard {
        let cx_pos = CURRENT_CONTEXT.with(|cx| cx.borrow_mut().push(self));

        ContextGuard {
            cx_pos,
            _marker: PhantomData,
        }
    }

    /// Wraps a closure so that this context is current while it runs.
    ///
    /// The attach/detach pair brackets the closure's execution wherever it is
    /// eventually invoked, which makes this suitable for handing units of
    /// work to other threads or pools.
    ///
    /// # Examples
    ///
    /// ```
    /// use tracewire::{Context, ContextKey};
    ///
    /// let key_a = ContextKey::new("a");
    /// let cx = Context::new().with_value(&key_a, 7u64);
    ///
    /// let handle = std::thread::spawn(cx.wrap(move || {
    ///     assert_eq!(Context::current().get(&key_a), Some(&7));
    /// }));
    /// handle.join().unwrap();
    /// ```
    pub fn wrap<F, R>(self, f: F) -> impl FnOnce() -> R
    where
        F: FnOnce() -> R,
    {
        move || {
            let _guard = self.attach();
            f()
        }
    }

    /// Root-pointer identity; `true` only for contexts deriving from the very
    /// same entry store (or two empty contexts).
    pub(crate) fn same_instance(&self, other: &Context) -> bool {
        self.entries.same_root(&other.entries)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    // The position of the context in the stack. This is used to pop the
    // context. `BASE_POS` marks a no-op guard from an idempotent attach.
    cx_pos: u16,
    // Ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let id = self.cx_pos;
        if id > ContextStack::BASE_POS && id < ContextStack::MAX_POS {
            CURRENT_CONTEXT.with(|context_stack| context_stack.borrow_mut().pop_id(id));
        }
    }
}

/// A stack for keeping track of the [`Context`] instances that have been
/// attached to a thread.
///
/// The stack allows for popping of contexts by position, which is used to do
/// out of order dropping of [`ContextGuard`] instances. Only when the top of
/// the stack is popped, the topmost [`Context`] is actually restored.
///
/// The stack relies on the fact that it is thread local and that the
/// [`ContextGuard`] instances that are constructed using ids from it can't be
/// moved to other threads. That means that the ids are always valid and that
/// they are always within the bounds of the stack.
struct ContextStack {
    /// This is the current [`Context`] that is active on this thread, and the
    /// top of the [`ContextStack`]. It is always present, and if the `stack`
    /// is empty it's the root [`Context`].
    ///
    /// Having this here allows for fast access to the current [`Context`].
    current_cx: Context,
    /// A `stack` of the other contexts that have been attached to the thread.
    stack: Vec<Option<Context>>,
    /// Ensure this type is !Send as it relies on thread locals
    _marker: PhantomData<*const ()>,
}

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    #[inline(always)]
    fn push(&mut self, cx: Context) -> u16 {
        // Attaching the context that is already current needs no restore
        // bookkeeping; hand out a no-op guard instead.
        if cx.same_instance(&self.current_cx) {
            return ContextStack::BASE_POS;
        }
        // The next id is the length of the `stack`, plus one since we have
        // the top of the [`ContextStack`] as the `current_cx`.
        let next_id = self.stack.len() + 1;
        if next_id < ContextStack::MAX_POS.into() {
            let current_cx = std::mem::replace(&mut self.current_cx, cx);
            self.stack.push(Some(current_cx));
            next_id as u16
        } else {
            // This is an overflow, log it and ignore it.
            wire_warn!(
                name: "Context.AttachFailed",
                message = format!("Too many contexts. Max limit is {}. \
                  Context::current() remains unchanged as this attach failed. \
                  Dropping the returned ContextGuard will have no impact on Context::current().",
                  ContextStack::MAX_POS)
            );
            ContextStack::MAX_POS
        }
    }

    #[inline(always)]
    fn pop_id(&mut self, pos: u16) {
        if pos == ContextStack::BASE_POS || pos == ContextStack::MAX_POS {
            // The root context is always at the bottom of the
            // [`ContextStack`] and cannot be popped, and the overflow
            // position is invalid, so do nothing.
            wire_warn!(
                name: "Context.OutOfOrderDrop",
                position = pos,
                message = if pos == ContextStack::BASE_POS {
                    "Attempted to pop the base context which is not allowed"
                } else {
                    "Attempted to pop the overflow position which is not allowed"
                }
            );
            return;
        }
        let len: u16 = self.stack.len() as u16;
        // Are we at the top of the [`ContextStack`]?
        if pos == len {
            // Shrink the stack if possible to clear out any out of order
            // pops.
            while let Some(None) = self.stack.last() {
                _ = self.stack.pop();
            }
            // Restore the previous context. This will always happen since the
            // root context is always at the bottom of the stack if the
            // [`ContextStack`] is not empty.
            if let Some(Some(next_cx)) = self.stack.pop() {
                self.current_cx = next_cx;
            }
        } else {
            // This is an out of order pop.
            if pos >= len {
                // This is an invalid id, ignore it.
                wire_warn!(
                    name: "Context.PopOutOfBounds",
                    position = pos,
                    stack_length = len,
                    message = "Attempted to pop beyond the end of the context stack"
                );
                return;
            }
            // The scope is being closed before scopes nested inside it. The
            // expected restore happens later, when the top of the stack pops;
            // flag the broken nesting and clear out the entry at the given id.
            wire_warn!(
                name: "Context.OutOfOrderPop",
                position = pos,
                stack_length = len,
                message = "Context scope dropped before inner scopes were closed"
            );
            _ = self.stack[pos as usize].take();
        }
    }

    #[inline(always)]
    fn map_current_cx<T>(&self, f: impl FnOnce(&Context) -> T) -> T {
        f(&self.current_cx)
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current_cx: Context::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}
