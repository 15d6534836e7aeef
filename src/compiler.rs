//! The Compiler (Loader): tokenizes a root template, and every partial it
//! transitively references, into a single [`Program`].
//!
//! This is a hand-rolled cursor scanner, not a grammar-derive parser,
//! because the tag grammar here is dynamic (delimiters are reconfigured
//! mid-parse by `{{=...=}}`) and instructions reference raw byte spans into
//! a shared blob, neither of which maps cleanly onto a static grammar.
//!
//! Parsing runs as an explicit, iterative stack of frames (one per
//! currently-open template) rather than recursive descent, so `MAX_NESTING`
//! is a plain depth check on a `Vec`, not a call-stack limit.

use crate::error::CompileError;
use crate::program::{
    DirEntry, Instruction, Program, MAX_DELIM, MAX_FILENAME_LEN, MAX_FILE_SIZE, MAX_NAME_LEN, MAX_NESTING,
};
use crate::resolver::PartialResolver;
use crate::debug::CompileTracer;

struct OpenSection {
    instr_index: usize,
    name: String,
    name_pos: u32,
    body_start: usize,
}

struct ParseFrame {
    dir_index: usize,
    data_pos: usize,
    data_end: usize,
    start_delim: String,
    end_delim: String,
    wrapper_instr: usize,
    open_stack: Vec<OpenSection>,
    /// Instruction index of the `SectionGoto` that caused this partial to be
    /// loaded, if any (`None` for the root template). Patched with the
    /// resume point once this frame finishes.
    goto_to_patch: Option<usize>,
}

pub struct Compiler<'r> {
    instructions: Vec<Instruction>,
    data: Vec<u8>,
    directory: Vec<DirEntry>,
    stack: Vec<ParseFrame>,
    resolver: &'r dyn PartialResolver,
    tracer: CompileTracer,
}

impl<'r> Compiler<'r> {
    /// Compile `filename` into a [`Program`]. If `inline` is `Some`, its
    /// bytes are used as the root template's source directly (and
    /// `filename` is only used for partial-resolution bookkeeping);
    /// otherwise the root source is loaded through `resolver`.
    pub fn compile(
        filename: &str,
        inline: Option<&[u8]>,
        resolver: &'r dyn PartialResolver,
        tracer: CompileTracer,
    ) -> Result<Program, CompileError> {
        let mut compiler = Compiler {
            instructions: Vec::new(),
            data: Vec::new(),
            directory: Vec::new(),
            stack: Vec::new(),
            resolver,
            tracer,
        };
        compiler.load_root(filename, inline)?;
        compiler.run()?;
        compiler
            .tracer
            .finish(filename, compiler.instructions.len(), compiler.data.len());
        Ok(Program::new(
            compiler.instructions,
            compiler.data,
            compiler.directory,
        ))
    }

    fn load_root(&mut self, filename: &str, inline: Option<&[u8]>) -> Result<(), CompileError> {
        if filename.is_empty() {
            return Err(CompileError::FileNameTooShort);
        }
        if filename.len() > MAX_FILENAME_LEN {
            return Err(CompileError::FileNameTooLong {
                len: filename.len(),
                max: MAX_FILENAME_LEN,
            });
        }
        let bytes = match inline {
            Some(bytes) => bytes.to_vec(),
            None => match self.resolver.read(filename)? {
                Some(bytes) => bytes,
                None => return Err(CompileError::FileNotFound { name: filename.to_string() }),
            },
        };
        if bytes.is_empty() {
            return Err(CompileError::EmptyTemplate);
        }
        if bytes.len() >= MAX_FILE_SIZE {
            return Err(CompileError::FileTooBig {
                name: filename.to_string(),
            });
        }
        self.tracer.start(filename, bytes.len());
        self.push_frame(filename, bytes, None)
    }

    fn push_frame(
        &mut self,
        filename: &str,
        bytes: Vec<u8>,
        goto_to_patch: Option<usize>,
    ) -> Result<(), CompileError> {
        if self.stack.len() >= MAX_NESTING {
            return Err(CompileError::TooDeep { max: MAX_NESTING });
        }
        let data_start = self.data.len() as u32;
        self.data.extend_from_slice(&bytes);
        let data_end = self.data.len();
        let path_len = filename
            .rfind(['/', '\\'])
            .map(|i| i + 1)
            .unwrap_or(0);
        let dir_index = self.directory.len();
        self.directory.push(DirEntry {
            filename: filename.to_string(),
            path_len,
            inst_start: self.instructions.len(),
            data_start,
            next: 0,
        });
        let wrapper_instr = self.instructions.len();
        self.instructions.push(Instruction::SectionStart {
            name_pos: 0,
            name_len: 0,
            offset: 0,
            len: 0,
            end: 0,
            inverted: false,
        });
        self.stack.push(ParseFrame {
            dir_index,
            data_pos: data_start as usize,
            data_end,
            start_delim: "{{".to_string(),
            end_delim: "}}".to_string(),
            wrapper_instr,
            open_stack: Vec::new(),
            goto_to_patch,
        });
        Ok(())
    }

    fn run(&mut self) -> Result<(), CompileError> {
        while !self.stack.is_empty() {
            let top = self.stack.len() - 1;
            if self.stack[top].data_pos >= self.stack[top].data_end {
                self.finish_frame()?;
                continue;
            }
            self.step(top)?;
        }
        Ok(())
    }

    fn finish_frame(&mut self) -> Result<(), CompileError> {
        let frame = self.stack.pop().expect("non-empty stack");
        if let Some(open) = frame.open_stack.last() {
            return Err(CompileError::ClosureMismatch {
                name: Some(open.name.clone()),
            });
        }
        let data_start = self.directory[frame.dir_index].data_start as usize;
        let body_len = (frame.data_end - data_start) as u32;
        let end_index = (self.instructions.len() + 1) as u32;
        if let Instruction::SectionStart { offset, len, end, .. } =
            &mut self.instructions[frame.wrapper_instr]
        {
            *offset = 0;
            *len = body_len;
            *end = end_index;
        }
        self.instructions
            .push(Instruction::SectionEnd { name_pos: 0, name_len: 0 });
        self.directory[frame.dir_index].next = frame.data_end as u32;
        if let Some(goto_idx) = frame.goto_to_patch {
            let resume = self.instructions.len() as u32;
            if let Instruction::SectionGoto { next, .. } = &mut self.instructions[goto_idx] {
                *next = resume;
            }
        }
        Ok(())
    }

    /// Scan one text-run-plus-tag step from the top frame.
    fn step(&mut self, top: usize) -> Result<(), CompileError> {
        let start_delim = self.stack[top].start_delim.clone();
        let end_delim = self.stack[top].end_delim.clone();
        let pos = self.stack[top].data_pos;
        let data_end = self.stack[top].data_end;

        let haystack = &self.data[pos..data_end];
        let tag_rel = find_subslice(haystack, start_delim.as_bytes());
        let Some(tag_rel) = tag_rel else {
            if pos < data_end {
                self.instructions.push(Instruction::WriteText {
                    pos: pos as u32,
                    len: (data_end - pos) as u32,
                });
            }
            self.stack[top].data_pos = data_end;
            return Ok(());
        };

        let tag_start = pos + tag_rel;
        if tag_start > pos {
            self.instructions.push(Instruction::WriteText {
                pos: pos as u32,
                len: (tag_start - pos) as u32,
            });
        }

        let inner_start = tag_start + start_delim.len();
        let haystack2 = &self.data[inner_start..data_end];
        let Some(end_rel) = find_subslice(haystack2, end_delim.as_bytes()) else {
            return Err(CompileError::ClosureMismatch { name: None });
        };
        let inner_end = inner_start + end_rel;
        let after_tag = inner_end + end_delim.len();

        self.stack[top].data_pos = after_tag;
        self.handle_tag(top, tag_start, inner_start, inner_end, &end_delim)
    }

    fn handle_tag(
        &mut self,
        top: usize,
        tag_start: usize,
        inner_start: usize,
        inner_end: usize,
        end_delim: &str,
    ) -> Result<(), CompileError> {
        if inner_start >= inner_end {
            self.emit_write_arg(' ', inner_start, inner_start as u32, 0, true);
            return Ok(());
        }
        match self.data[inner_start] {
            b'!' => {
                self.tracer.tag('!', "", inner_start);
                Ok(())
            }
            b'=' => {
                self.tracer.tag('=', "", inner_start);
                self.handle_delim_change(top, inner_start, inner_end)
            }
            b'#' => self.handle_section_open(top, inner_start, inner_end, false),
            b'^' => self.handle_section_open(top, inner_start, inner_end, true),
            b'/' => self.handle_section_close(top, tag_start, inner_start, inner_end),
            b'>' => self.handle_partial(top, inner_start, inner_end),
            b'{' => self.handle_triple_mustache(top, inner_start, inner_end, end_delim),
            b'&' => {
                let (name_pos, name_len) = self.trimmed_span(inner_start + 1, inner_end)?;
                self.emit_write_arg('&', inner_start, name_pos, name_len, false);
                Ok(())
            }
            b':' | b'<' => {
                let sigil = self.data[inner_start] as char;
                let (name_pos, name_len) = self.trimmed_span(inner_start + 1, inner_end)?;
                self.emit_write_arg(sigil, inner_start, name_pos, name_len, true);
                Ok(())
            }
            _ => {
                let (name_pos, name_len) = self.trimmed_span(inner_start, inner_end)?;
                self.emit_write_arg(' ', inner_start, name_pos, name_len, true);
                Ok(())
            }
        }
    }

    fn handle_triple_mustache(
        &mut self,
        top: usize,
        inner_start: usize,
        inner_end: usize,
        end_delim: &str,
    ) -> Result<(), CompileError> {
        let ebytes = end_delim.as_bytes();
        let is_brace_delim = ebytes.first() == Some(&b'}') && ebytes.last() == Some(&b'}');
        if is_brace_delim {
            let after = self.stack[top].data_pos;
            if after < self.stack[top].data_end && self.data[after] == b'}' {
                self.stack[top].data_pos += 1;
                let (name_pos, name_len) = self.trimmed_span(inner_start + 1, inner_end)?;
                self.emit_write_arg('{', inner_start, name_pos, name_len, false);
                return Ok(());
            }
        }
        let (name_pos, name_len) = self.trimmed_span(inner_start + 1, inner_end)?;
        self.emit_write_arg('{', inner_start, name_pos, name_len, true);
        Ok(())
    }

    fn handle_delim_change(
        &mut self,
        top: usize,
        inner_start: usize,
        inner_end: usize,
    ) -> Result<(), CompileError> {
        if inner_end - inner_start < 2 || self.data[inner_end - 1] != b'=' {
            return Err(CompileError::ClosureMismatch { name: None });
        }
        let body = &self.data[inner_start + 1..inner_end - 1];
        let text = std::str::from_utf8(body).map_err(|_| CompileError::ClosureMismatch { name: None })?;
        let mut parts = text.split_ascii_whitespace();
        let (new_start, new_end) = match (parts.next(), parts.next(), parts.next()) {
            (Some(s), Some(e), None) => (s, e),
            _ => return Err(CompileError::ClosureMismatch { name: None }),
        };
        if new_start.len() > MAX_DELIM || new_end.len() > MAX_DELIM {
            let longest = if new_start.len() > new_end.len() { new_start } else { new_end };
            return Err(CompileError::DelimiterTooLong {
                delim: longest.to_string(),
                max: MAX_DELIM,
            });
        }
        self.stack[top].start_delim = new_start.to_string();
        self.stack[top].end_delim = new_end.to_string();
        Ok(())
    }

    fn handle_section_open(
        &mut self,
        top: usize,
        inner_start: usize,
        inner_end: usize,
        inverted: bool,
    ) -> Result<(), CompileError> {
        let (name_pos, name_len) = self.trimmed_span(inner_start + 1, inner_end)?;
        if self.stack[top].open_stack.len() >= MAX_NESTING {
            return Err(CompileError::TooDeep { max: MAX_NESTING });
        }
        let name = self.name_string(name_pos, name_len);
        self.tracer.tag(if inverted { '^' } else { '#' }, &name, inner_start);
        let instr_index = self.instructions.len();
        self.instructions.push(Instruction::SectionStart {
            name_pos,
            name_len,
            offset: 0,
            len: 0,
            end: 0,
            inverted,
        });
        let body_start = self.stack[top].data_pos;
        self.stack[top].open_stack.push(OpenSection {
            instr_index,
            name,
            name_pos,
            body_start,
        });
        Ok(())
    }

    fn handle_section_close(
        &mut self,
        top: usize,
        tag_start: usize,
        inner_start: usize,
        inner_end: usize,
    ) -> Result<(), CompileError> {
        let (name_pos, name_len) = self.trimmed_span(inner_start + 1, inner_end)?;
        let name = self.name_string(name_pos, name_len);
        self.tracer.tag('/', &name, inner_start);
        let open = match self.stack[top].open_stack.pop() {
            Some(open) => open,
            None => return Err(CompileError::ClosureMismatch { name: Some(name) }),
        };
        if open.name != name {
            return Err(CompileError::ClosureMismatch { name: Some(name) });
        }
        let end_index = (self.instructions.len() + 1) as u32;
        let offset = (open.body_start - open.name_pos as usize) as u32;
        let len = (tag_start - open.body_start) as u32;
        if let Instruction::SectionStart { offset: o, len: l, end: e, .. } =
            &mut self.instructions[open.instr_index]
        {
            *o = offset;
            *l = len;
            *e = end_index;
        }
        self.instructions.push(Instruction::SectionEnd {
            name_pos: open.name_pos,
            name_len,
        });
        Ok(())
    }

    fn handle_partial(
        &mut self,
        top: usize,
        inner_start: usize,
        inner_end: usize,
    ) -> Result<(), CompileError> {
        let (name_pos, name_len) = self.trimmed_span(inner_start + 1, inner_end)?;
        let name = self.name_string(name_pos, name_len);
        self.tracer.tag('>', &name, inner_start);
        if name.is_empty() {
            return Err(CompileError::FileNameTooShort);
        }
        if name.len() > MAX_FILENAME_LEN {
            return Err(CompileError::FileNameTooLong {
                len: name.len(),
                max: MAX_FILENAME_LEN,
            });
        }

        let goto_index = self.instructions.len();
        self.instructions
            .push(Instruction::SectionGoto { target: 0, next: 0 });

        if let Some(entry) = self.directory.iter().find(|e| e.filename == name) {
            let target = entry.inst_start as u32;
            self.patch_goto(goto_index, target, (goto_index + 1) as u32);
            self.tracer.partial(&name, &entry.filename, true);
            return Ok(());
        }

        let (resolved_name, bytes) = self.resolve_partial_source(top, &name)?;

        if let Some(entry) = self.directory.iter().find(|e| e.filename == resolved_name) {
            let target = entry.inst_start as u32;
            self.patch_goto(goto_index, target, (goto_index + 1) as u32);
            self.tracer.partial(&name, &resolved_name, true);
            return Ok(());
        }

        self.tracer.partial(&name, &resolved_name, false);
        self.push_frame(&resolved_name, bytes, Some(goto_index))?;
        let target = self.directory.last().expect("just pushed").inst_start as u32;
        self.patch_target(goto_index, target);
        Ok(())
    }

    /// Walk the parsing stack from the referencing frame up toward the
    /// root, trying `<dir>/<name>` and `<dir>/<name>.mustache` in each
    /// distinct ancestor directory, stopping once a frame rooted at the
    /// current working directory (no path prefix) has been tried.
    fn resolve_partial_source(&self, top: usize, name: &str) -> Result<(String, Vec<u8>), CompileError> {
        let mut last_prefix: Option<String> = None;
        for frame in self.stack[..=top].iter().rev() {
            let dir_entry = &self.directory[frame.dir_index];
            let prefix = dir_entry.filename[..dir_entry.path_len].to_string();
            let stop_after = dir_entry.path_len == 0;
            if last_prefix.as_deref() == Some(prefix.as_str()) {
                if stop_after {
                    break;
                }
                continue;
            }
            last_prefix = Some(prefix.clone());

            let candidate = format!("{prefix}{name}");
            if let Some(bytes) = self.resolver.read(&candidate)? {
                if bytes.is_empty() {
                    return Err(CompileError::EmptyTemplate);
                }
                if bytes.len() >= MAX_FILE_SIZE {
                    return Err(CompileError::FileTooBig { name: name.to_string() });
                }
                return Ok((candidate, bytes));
            }
            let with_ext = format!("{candidate}.mustache");
            if let Some(bytes) = self.resolver.read(&with_ext)? {
                if bytes.is_empty() {
                    return Err(CompileError::EmptyTemplate);
                }
                if bytes.len() >= MAX_FILE_SIZE {
                    return Err(CompileError::FileTooBig { name: name.to_string() });
                }
                return Ok((with_ext, bytes));
            }
            if stop_after {
                break;
            }
        }
        Err(CompileError::FileNotFound { name: name.to_string() })
    }

    fn patch_goto(&mut self, idx: usize, target: u32, next: u32) {
        if let Instruction::SectionGoto { target: t, next: n } = &mut self.instructions[idx] {
            *t = target;
            *n = next;
        }
    }

    fn patch_target(&mut self, idx: usize, target: u32) {
        if let Instruction::SectionGoto { target: t, .. } = &mut self.instructions[idx] {
            *t = target;
        }
    }

    fn emit_write_arg(&mut self, sigil: char, tag_pos: usize, name_pos: u32, name_len: u16, escape: bool) {
        let name = self.name_string(name_pos, name_len);
        self.tracer.tag(sigil, &name, tag_pos);
        self.instructions
            .push(Instruction::WriteArg { name_pos, name_len, escape });
    }

    fn name_string(&self, name_pos: u32, name_len: u16) -> String {
        String::from_utf8_lossy(&self.data[name_pos as usize..name_pos as usize + name_len as usize])
            .into_owned()
    }

    fn trimmed_span(&self, mut start: usize, mut end: usize) -> Result<(u32, u16), CompileError> {
        while start < end && self.data[start].is_ascii_whitespace() {
            start += 1;
        }
        while end > start && self.data[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        let len = end - start;
        if len > MAX_NAME_LEN {
            return Err(CompileError::NameTooLong { len, max: MAX_NAME_LEN });
        }
        Ok((start as u32, len as u16))
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::InMemoryResolver;

    fn compile(src: &str) -> Program {
        let resolver = InMemoryResolver::new();
        Compiler::compile("root", Some(src.as_bytes()), &resolver, CompileTracer::new(false)).unwrap()
    }

    #[test]
    fn plain_text_is_one_write_text_instruction() {
        let program = compile("hello world");
        // wrapper SECTION_START, WRITE_TEXT, SECTION_END
        assert_eq!(program.instruction_count(), 3);
        match program.instructions()[1] {
            Instruction::WriteText { pos, len } => {
                assert_eq!(program.text(pos, len).unwrap(), "hello world");
            }
            other => panic!("expected WriteText, got {other:?}"),
        }
    }

    #[test]
    fn variable_tag_emits_escaped_write_arg() {
        let program = compile("hi {{name}}!");
        let found = program.instructions().iter().any(|i| {
            matches!(i, Instruction::WriteArg { escape: true, name_pos, name_len }
                if program.text(*name_pos, *name_len as u32).unwrap() == "name")
        });
        assert!(found);
    }

    #[test]
    fn triple_mustache_is_unescaped() {
        let program = compile("{{{raw}}}");
        let found = program.instructions().iter().any(|i| {
            matches!(i, Instruction::WriteArg { escape: false, .. })
        });
        assert!(found);
    }

    #[test]
    fn unclosed_section_is_closure_mismatch() {
        let resolver = InMemoryResolver::new();
        let err = Compiler::compile(
            "root",
            Some(b"{{#a}}x"),
            &resolver,
            CompileTracer::new(false),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ClosureMismatch);
    }

    #[test]
    fn mismatched_close_name_errors() {
        let resolver = InMemoryResolver::new();
        let err = Compiler::compile(
            "root",
            Some(b"{{#a}}x{{/b}}"),
            &resolver,
            CompileTracer::new(false),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ClosureMismatch);
    }

    #[test]
    fn delimiter_change_is_honored() {
        let program = compile("{{=<% %>=}}<% name %>{{literal}}");
        // after the switch, "{{literal}}" is no longer a tag and should be
        // emitted as a single text run (not a variable).
        let has_literal_text = program.instructions().iter().any(|i| {
            matches!(i, Instruction::WriteText { pos, len } if program.text(*pos, *len).unwrap().contains("{{literal}}"))
        });
        assert!(has_literal_text);
    }

    #[test]
    fn partial_dedup_shares_one_directory_entry() {
        let resolver = InMemoryResolver::new().with("p", "partial body");
        let program = Compiler::compile(
            "root",
            Some(b"{{>p}}-{{>p}}"),
            &resolver,
            CompileTracer::new(false),
        )
        .unwrap();
        assert_eq!(program.directory().len(), 2); // root + p, loaded once
        let goto_count = program
            .instructions()
            .iter()
            .filter(|i| matches!(i, Instruction::SectionGoto { .. }))
            .count();
        assert_eq!(goto_count, 2);
    }

    #[test]
    fn directory_covers_data_blob_without_gaps() {
        let resolver = InMemoryResolver::new().with("p", "partial body");
        let program = Compiler::compile(
            "root",
            Some(b"a{{>p}}b"),
            &resolver,
            CompileTracer::new(false),
        )
        .unwrap();
        let mut expect_start = 0u32;
        for entry in program.directory() {
            assert_eq!(entry.data_start, expect_start);
            expect_start = entry.next;
        }
        assert_eq!(expect_start as usize, program.data_len());
    }
}
