//! The compiled, immutable `Program`: a linear instruction array over a
//! single shared byte blob, plus the template directory that records which
//! byte range and instruction range belongs to which loaded template.
//!
//! A `Program` never borrows from the source it was compiled from — every
//! tag name, literal text run, and section body is an offset/length pair
//! into `Program::data`, which owns a copy of every template's raw bytes.
//! That makes `Program` plain, immutable, `Send + Sync` data: no interior
//! mutability, nothing to lock, trivially shareable across threads behind
//! an `Arc` once compiled.

/// Maximum nesting depth for both the compile-time parsing stack and the
/// evaluation-time section stack.
pub const MAX_NESTING: usize = 96;

/// Maximum length, in bytes, of a single delimiter string (e.g. the `{{`
/// in `{{= {{ }} =}}`).
pub const MAX_DELIM: usize = 11;

/// Maximum length, in bytes, of a tag name.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Maximum length, in bytes, of a partial's filename.
pub const MAX_FILENAME_LEN: usize = 8191;

/// Maximum size, in bytes, of any single loaded template file (root or
/// partial). A file at or beyond this size is rejected as `FileTooBig`
/// before its bytes ever reach the tokenizer.
pub const MAX_FILE_SIZE: usize = 1 << 31;

/// One instruction in a compiled [`Program`]. Every byte-range field is an
/// offset into `Program::data`; every instruction-index field is an index
/// into `Program::instructions`.
///
/// Expressed as an enum with per-variant fields rather than a fixed-width
/// packed record — the logical layout and invariants are identical either
/// way, the physical representation is just the idiomatic Rust one. See
/// `DESIGN.md`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Emit a literal, already-resolved run of source bytes verbatim.
    WriteText { pos: u32, len: u32 },

    /// Emit the value named by `data[name_pos..name_pos+name_len]`.
    /// `escape` distinguishes `{{name}}` (true) from `{{{name}}}` /
    /// `{{&name}}` (false).
    WriteArg {
        name_pos: u32,
        name_len: u16,
        escape: bool,
    },

    /// Open a (possibly inverted) section named by `name_pos`/`name_len`.
    ///
    /// - `offset`: distance from `name_pos` to the first byte of the
    ///   section body (used to recover the raw body text).
    /// - `len`: byte length of the section body.
    /// - `end`: index of the instruction immediately following the
    ///   matching `SectionEnd`.
    /// - `inverted`: true for `{{^name}}`, false for `{{#name}}`.
    SectionStart {
        name_pos: u32,
        name_len: u16,
        offset: u32,
        len: u32,
        end: u32,
        inverted: bool,
    },

    /// Close the section opened by the matching `SectionStart`. Carries a
    /// copy of the matching start's name for callback convenience; control
    /// flow itself never consults these fields, only the evaluator's own
    /// section-frame stack.
    SectionEnd { name_pos: u32, name_len: u16 },

    /// A partial reference: jump to the partial's own wrapper section at
    /// instruction `target` and resume at instruction `next` once it has
    /// rendered. `target` always indexes a `SectionStart` (or another
    /// `SectionGoto`, for a partial that is itself a lone reference).
    SectionGoto { target: u32, next: u32 },
}

/// One entry in the template directory: one per uniquely-resolved template
/// (root or partial), in load order. Entries tile `Program::data`
/// contiguously and without gaps: entry `i`'s bytes start where entry
/// `i - 1`'s ended, and the last entry's `next` equals `data.len()`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// The name this template was loaded under (verbatim root filename, or
    /// the partial name/resolved path it was found at).
    pub filename: String,
    /// Index (inclusive of separator) of the last path separator in
    /// `filename`; `0` if `filename` carries no directory component.
    pub path_len: usize,
    /// Index into `Program::instructions` of this template's wrapper
    /// `SectionStart`.
    pub inst_start: usize,
    /// Byte offset into `Program::data` where this template's raw source
    /// begins.
    pub data_start: u32,
    /// Byte offset into `Program::data` where this template's raw source
    /// ends (exclusive); equal to the next entry's `data_start`, or
    /// `data.len()` for the last entry.
    pub next: u32,
}

/// A compiled template: immutable, shareable across threads, cheap to
/// clone (wrap in `Arc` for true zero-copy sharing).
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) data: Vec<u8>,
    pub(crate) directory: Vec<DirEntry>,
}

impl Program {
    /// Compile `filename` by loading its source (and any partials it
    /// references) through `resolver`.
    pub fn compile(
        filename: &str,
        resolver: &dyn crate::resolver::PartialResolver,
    ) -> Result<Program, crate::error::CompileError> {
        crate::compiler::Compiler::compile(filename, None, resolver, crate::debug::CompileTracer::default())
    }

    /// Compile inline `source`, registered under `name` for partial
    /// dedup/self-reference purposes; partials it references still resolve
    /// through `resolver`.
    pub fn compile_str(
        name: &str,
        source: &str,
        resolver: &dyn crate::resolver::PartialResolver,
    ) -> Result<Program, crate::error::CompileError> {
        crate::compiler::Compiler::compile(
            name,
            Some(source.as_bytes()),
            resolver,
            crate::debug::CompileTracer::default(),
        )
    }

    /// Like [`Program::compile`], with an explicit compile-time tracer.
    pub fn compile_with_tracer(
        filename: &str,
        resolver: &dyn crate::resolver::PartialResolver,
        tracer: crate::debug::CompileTracer,
    ) -> Result<Program, crate::error::CompileError> {
        crate::compiler::Compiler::compile(filename, None, resolver, tracer)
    }

    pub(crate) fn new(
        instructions: Vec<Instruction>,
        data: Vec<u8>,
        directory: Vec<DirEntry>,
    ) -> Self {
        Program {
            instructions,
            data,
            directory,
        }
    }

    /// The full instruction array.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions in the program.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Total length, in bytes, of the shared data blob.
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// The template directory, in load order.
    pub fn directory(&self) -> &[DirEntry] {
        &self.directory
    }

    /// Slice the shared data blob as raw bytes.
    pub fn bytes(&self, pos: u32, len: u32) -> &[u8] {
        &self.data[pos as usize..pos as usize + len as usize]
    }

    /// Slice the shared data blob as UTF-8 text.
    ///
    /// Every span handed back here was carved out of validated UTF-8
    /// template source along `char` boundaries, so this never fails in
    /// practice; it returns `Result` rather than panicking to stay honest
    /// about the byte-oriented representation underneath.
    pub fn text(&self, pos: u32, len: u32) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.bytes(pos, len))
    }

    /// The raw, unrendered body text of a section instruction (the slice
    /// between its opening and closing tags), per `SectionStart`'s
    /// `offset`/`len` fields.
    pub fn section_body(&self, name_pos: u32, offset: u32, len: u32) -> &[u8] {
        let start = name_pos as usize + offset as usize;
        &self.data[start..start + len as usize]
    }

    /// Render a human-readable dump of the instruction listing, useful for
    /// `--dump-program`-style diagnostics.
    pub fn dump(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        for (i, instr) in self.instructions.iter().enumerate() {
            let _ = write!(out, "{i:>5}  ");
            match *instr {
                Instruction::WriteText { pos, len } => {
                    let text = self.text(pos, len).unwrap_or("<invalid utf8>");
                    let _ = writeln!(out, "WRITE_TEXT       {text:?}");
                }
                Instruction::WriteArg {
                    name_pos,
                    name_len,
                    escape,
                } => {
                    let name = self.text(name_pos, name_len as u32).unwrap_or("?");
                    let tag = if escape { "WRITE_ARG" } else { "WRITE_ARG_RAW" };
                    let _ = writeln!(out, "{tag:<16} {name:?}");
                }
                Instruction::SectionStart {
                    name_pos,
                    name_len,
                    end,
                    inverted,
                    ..
                } => {
                    let name = self.text(name_pos, name_len as u32).unwrap_or("?");
                    let tag = if inverted {
                        "SECTION_START_INV"
                    } else {
                        "SECTION_START"
                    };
                    let _ = writeln!(out, "{tag:<18} {name:?} end={end}");
                }
                Instruction::SectionEnd {
                    name_pos, name_len, ..
                } => {
                    let name = self.text(name_pos, name_len as u32).unwrap_or("?");
                    let _ = writeln!(out, "SECTION_END      {name:?}");
                }
                Instruction::SectionGoto { target, next } => {
                    let _ = writeln!(out, "SECTION_GOTO     target={target} next={next}");
                }
            }
        }
        out
    }
}
