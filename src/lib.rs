//! Offline compiler for `.at` indentation-based HTML templates.
//!
//! The crate implements a strictly forward pipeline:
//! 1. Lexer: source → `LINE`/`INDENT`/`DEDENT`/`BLANK`/`EOF` tokens
//! 2. Parser: tokens → AST plus a replace map of patch sites
//! 3. Linker: include and `extends`/`block` resolution, in place
//! 4. Translator/emitter: AST → flat emission stream → C++ module
//!
//! The generated module exposes `render(...)`, which streams the final
//! HTML into a string buffer and returns it.
//!
//! # Example
//!
//! ```
//! use atc::{Compiler, GenerateOptions};
//!
//! let compiler = Compiler::new(".");
//! let output = compiler
//!     .compile_source("p Hello #{name}!\n", "hello", &GenerateOptions::default())
//!     .unwrap();
//! assert!(output.code.contains("ss << \"<p>Hello \" << name << \"!</p>\";"));
//! ```

pub mod ast;
pub mod depfile;
pub mod error;
pub mod generate;
pub mod head;
pub mod html;
pub mod linker;
pub mod parser;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use generate::Translator;
use linker::{load_template, Linker, Manifest, Template};

pub use error::{CompileError, ErrorKind, ParseError};
pub use generate::GenerateOptions;
pub use linker::FileRecord;
pub use parser::Pos;

/// Result of compiling one root template.
#[derive(Debug)]
pub struct CompileOutput {
    /// Generated C++ module text.
    pub code: String,
    /// Every file opened during compilation, in first-open order.
    pub manifest: Manifest,
}

/// Whole-template compiler. `include` and `extends` paths resolve against
/// the base directory; there is no search list.
pub struct Compiler {
    base_dir: PathBuf,
}

impl Compiler {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Compile the root template at `input`.
    pub fn compile_file(
        &self,
        input: &Path,
        options: &GenerateOptions,
    ) -> Result<CompileOutput, CompileError> {
        let mut manifest = Manifest::new();
        let mut tpl = load_template(input, &mut manifest)?;
        Linker::new(&self.base_dir).link(&mut tpl, &mut manifest)?;

        let name = options.module_name.clone().unwrap_or_else(|| {
            input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "template".to_string())
        });
        let code = self.generate(&tpl, &name)?;
        Ok(CompileOutput { code, manifest })
    }

    /// Compile template text directly, as if it were `<name>.at` in the
    /// base directory. Includes and inheritance still resolve against the
    /// base directory.
    pub fn compile_source(
        &self,
        source: &str,
        name: &str,
        options: &GenerateOptions,
    ) -> Result<CompileOutput, CompileError> {
        let path = self.base_dir.join(format!("{}.at", name));
        let src: Arc<str> = Arc::from(source);
        let parsed =
            parser::parse(&src).map_err(|e| CompileError::parse(e, &path, src.clone()))?;
        let mut tpl = Template {
            path,
            source: src,
            ast: parsed.ast,
            replace_map: parsed.replace_map,
            extends: parsed.extends,
        };
        let mut manifest = Manifest::new();
        Linker::new(&self.base_dir).link(&mut tpl, &mut manifest)?;

        let name = options.module_name.as_deref().unwrap_or(name);
        let code = self.generate(&tpl, name)?;
        Ok(CompileOutput { code, manifest })
    }

    fn generate(&self, tpl: &Template, name: &str) -> Result<String, CompileError> {
        let module = Translator::new()
            .translate(&tpl.ast)
            .map_err(|e| CompileError::parse(e, &tpl.path, tpl.source.clone()))?;
        Ok(generate::write_module(&module, name))
    }
}
