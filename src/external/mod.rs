//! External collaborators: the language model, the Z-Machine interpreter
//! process, and the hook/observer surface. Only traits and test doubles live
//! here — concrete provider clients, the interpreter process wrapper, and a
//! dashboard are all out of scope for this crate.

mod hooks;
mod interpreter;
mod language_model;

pub use hooks::{Hook, Hooks};
pub use interpreter::{classify_output, Interpreter, OutputClass};
pub use language_model::{
    complete_json_validated, CompletionRequest, CompletionResponse, JsonRequest, LanguageModel, Message,
};

/// Each collaborator module keeps its own `test_double` submodule so its
/// fixture lives next to the trait it fakes; this re-exports all three under
/// one name instead of gluing them together with three `pub use ...::*`
/// (which would leave three same-named `test_double` modules ambiguous at
/// the `external::test_double` path).
#[cfg(test)]
pub mod test_double {
    pub use super::hooks::test_double::*;
    pub use super::interpreter::test_double::*;
    pub use super::language_model::test_double::*;
}
