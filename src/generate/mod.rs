mod cxx;
mod translator;

pub use cxx::write_module;
pub use translator::{Emit, External, Mixin, Module, Translator};

/// Options for module generation.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Namespace for the generated module. Defaults to the input file
    /// stem.
    pub module_name: Option<String>,
}
