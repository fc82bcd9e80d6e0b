//! Call sites: symbol binding, marshalling, dispatch.
//!
//! A [`CallSite`] owns an ordered parameter row with direction flags, a
//! return type, and a lazily bound native address. Invocation marshals
//! the managed arguments (validating everything before any native code
//! runs), drives the call through libffi, converts the result back, and
//! writes Out/InOut parameters into the caller's bindings.

mod dispatch;
mod extern_var;
mod marshal;
mod sig;
mod site;

pub use extern_var::ExternVariable;
pub use sig::Signature;
pub use site::{CallSite, Direction, Mangling, NativeSymbol, Param};

#[cfg(test)]
mod tests;
