//! The Evaluator (VM): a linear, non-recursive walk over a compiled
//! [`Program`]'s instruction array, dispatching to five host callbacks.
//!
//! The VM never allocates per-name lookups or owns a value model of its
//! own — it only threads an opaque, host-defined [`UserData`] token through
//! a bounded section-frame stack and asks the host what to do at each
//! section boundary. That keeps the core engine decoupled from any
//! concrete data representation, the way `src/json_host.rs` is one
//! possible concrete host among others.

use crate::debug::EvalTracer;
use crate::error::EvalError;
use crate::program::{Instruction, Program, MAX_NESTING};

/// An opaque pair of host-defined tokens threaded through the section-frame
/// stack. The VM never interprets these; it only copies them around and
/// hands them back to the host's own callbacks.
pub type UserData = (u64, u64);

/// A handle to the section frame a callback is currently executing
/// against. Exposes the two callback-side helpers a host needs beyond the
/// raw `udata` token: walking to the nearest enclosing frame whose `udata`
/// actually differs (skipping frames that merely inherited their parent's
/// context unchanged), and — only while testing a section, i.e. from
/// `on_section_test` — that section's own raw, unrendered body text, for
/// hosts that want to invoke a lambda-style value directly against it
/// rather than let the VM iterate the body as Mustache source.
pub struct Section<'p> {
    udata: UserData,
    parent: Option<UserData>,
    body: Option<&'p str>,
}

impl<'p> Section<'p> {
    /// The `udata` this callback is executing against.
    pub fn udata(&self) -> UserData {
        self.udata
    }

    /// The nearest ancestor frame whose `udata` differs from this one's,
    /// skipping pass-through frames (e.g. the per-template/per-partial
    /// wrapper) that merely inherited their parent's context unchanged.
    /// `None` if no enclosing frame carries a different token.
    pub fn parent(&self) -> Option<UserData> {
        self.parent
    }

    /// This section's raw, unrendered body source. Populated only for the
    /// `on_section_test` call (a `SECTION_START`/`SECTION_START_INV`
    /// opcode); `None` everywhere else, and `None` there too if the body
    /// is not valid UTF-8.
    pub fn body(&self) -> Option<&'p str> {
        self.body
    }
}

/// The five callbacks a host must implement to drive evaluation.
pub trait Callbacks {
    type Error;

    /// Emit a literal, already-resolved run of text.
    fn on_text(&mut self, text: &str) -> Result<(), Self::Error>;

    /// Emit the value named `name`, resolved against `section`. `escape`
    /// distinguishes `{{name}}` from `{{{name}}}`/`{{&name}}`.
    fn on_arg(&mut self, section: &Section<'_>, name: &str, escape: bool) -> Result<(), Self::Error>;

    /// Test a (possibly inverted) section named `name` against `section`.
    /// Returns how many times its body should render (`0` skips it
    /// entirely; for an inverted section this is the "is falsy" count)
    /// together with a token identifying the resolved section value, which
    /// the VM hands back unchanged to every `on_section_start` call for
    /// this section instance.
    fn on_section_test(
        &mut self,
        section: &Section<'_>,
        name: &str,
        inverted: bool,
    ) -> Result<(usize, UserData), Self::Error>;

    /// Called immediately before each iteration of a named section's body,
    /// given the section-value token returned by `on_section_test` and the
    /// zero-based iteration `index`. Returns the `udata` the body of this
    /// iteration should see (e.g. the i-th list element). Not called for
    /// the implicit per-template/per-partial wrapper sections, which
    /// always iterate exactly once using the enclosing `udata` unchanged.
    fn on_section_start(&mut self, section: &Section<'_>, index: usize) -> Result<UserData, Self::Error>;

    /// Cleanup hook invoked on any evaluation failure: a host callback
    /// returning `Err`, or a VM-detected fault (malformed UTF-8 span,
    /// nesting exceeded). Lets the host discard a partial output buffer.
    /// Called best-effort everywhere except the malformed-UTF-8-span case,
    /// the one spot where this method's own result still matters: `Ok`
    /// there tells the VM to carry on treating the offending span as
    /// empty rather than aborting.
    fn on_formatting_error(&mut self, error: &EvalError) -> Result<(), Self::Error>;
}

/// Either a VM-internal fault or an error surfaced by a host callback.
#[derive(Debug)]
pub enum RenderError<E> {
    Vm(EvalError),
    Host(E),
}

impl<E: std::fmt::Display> std::fmt::Display for RenderError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Vm(e) => write!(f, "{e}"),
            RenderError::Host(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RenderError<E> {}

struct SectionFrame {
    /// The token `on_section_start` is re-supplied on every iteration: the
    /// section-value token from `on_section_test`, or the enclosing
    /// context for the template/partial wrapper (which skips the test).
    base_udata: UserData,
    /// The context the current iteration's body should see.
    udata: UserData,
    /// Instruction index of this frame's `SectionStart`/`SectionGoto`.
    start: usize,
    /// Instruction index to resume at once this frame is exhausted.
    end: usize,
    index: usize,
    count: usize,
    /// Whether this frame is a real, named section (`on_section_start` is
    /// called for it) as opposed to an implicit per-template/per-partial
    /// wrapper or partial-reference frame (`name_len == 0`), which always
    /// iterates exactly once without a callback.
    named: bool,
}

/// Evaluate `program` against `root_udata`, driving `callbacks`.
pub fn evaluate<C: Callbacks>(
    program: &Program,
    callbacks: &mut C,
    root_udata: UserData,
    tracer: EvalTracer,
) -> Result<(), RenderError<C::Error>> {
    tracer.start();
    let instrs = program.instructions();

    // Sentinel frame: supplies root_udata as the "parent" context instruction
    // 0 (the root template's wrapper SectionStart) is dispatched against.
    let mut stack: Vec<SectionFrame> = vec![SectionFrame {
        base_udata: root_udata,
        udata: root_udata,
        start: 0,
        end: 0,
        index: 0,
        count: 0,
        named: false,
    }];

    let mut pos = 0usize;
    while pos < instrs.len() {
        let instr = instrs[pos];
        tracer.step(pos, stack.len(), &format!("{instr:?}"));
        match instr {
            Instruction::WriteText { pos: p, len } => {
                let text = text_or_report(program, callbacks, &tracer, p, len)?;
                callbacks
                    .on_text(text)
                    .map_err(|e| abort_host(callbacks, &tracer, e))?;
                pos += 1;
            }
            Instruction::WriteArg {
                name_pos,
                name_len,
                escape,
            } => {
                let name = text_or_report(program, callbacks, &tracer, name_pos, name_len as u32)?;
                let top = stack.last().expect("sentinel frame always present");
                let section = Section {
                    udata: top.udata,
                    parent: find_ancestor(&stack[..stack.len() - 1], top.udata),
                    body: None,
                };
                callbacks
                    .on_arg(&section, name, escape)
                    .map_err(|e| abort_host(callbacks, &tracer, e))?;
                pos += 1;
            }
            Instruction::SectionStart {
                name_pos,
                name_len,
                offset,
                len,
                end,
                inverted,
            } => {
                if stack.len() >= MAX_NESTING {
                    let err = EvalError::TooDeep { max: MAX_NESTING };
                    return Err(abort(callbacks, &tracer, err));
                }
                let parent_udata = stack.last().expect("sentinel frame always present").udata;
                let (count, base_udata, named) = if name_len == 0 {
                    (1, parent_udata, false)
                } else {
                    let name =
                        text_or_report(program, callbacks, &tracer, name_pos, name_len as u32)?;
                    let body = std::str::from_utf8(program.section_body(name_pos, offset, len)).ok();
                    let section = Section {
                        udata: parent_udata,
                        parent: find_ancestor(&stack[..stack.len() - 1], parent_udata),
                        body,
                    };
                    let (count, value) = callbacks
                        .on_section_test(&section, name, inverted)
                        .map_err(|e| abort_host(callbacks, &tracer, e))?;
                    (count, value, true)
                };
                stack.push(SectionFrame {
                    base_udata,
                    udata: base_udata,
                    start: pos,
                    end: end as usize,
                    index: 0,
                    count,
                    named,
                });
                pos = advance_or_exit(&mut stack, callbacks, &tracer)?;
            }
            Instruction::SectionGoto { target, next } => {
                if stack.len() >= MAX_NESTING {
                    let err = EvalError::TooDeep { max: MAX_NESTING };
                    return Err(abort(callbacks, &tracer, err));
                }
                let parent_udata = stack.last().expect("sentinel frame always present").udata;
                stack.push(SectionFrame {
                    base_udata: parent_udata,
                    udata: parent_udata,
                    start: target as usize,
                    end: next as usize,
                    index: 0,
                    count: 1,
                    named: false,
                });
                pos = advance_or_exit(&mut stack, callbacks, &tracer)?;
            }
            Instruction::SectionEnd { .. } => {
                pos = advance_or_exit(&mut stack, callbacks, &tracer)?;
            }
        }
    }
    tracer.finish();
    Ok(())
}

/// The nearest frame in `frames` (searched innermost-first) whose `udata`
/// differs from `current`.
fn find_ancestor(frames: &[SectionFrame], current: UserData) -> Option<UserData> {
    frames.iter().rev().map(|f| f.udata).find(|&u| u != current)
}

/// Shared "fall through to SECTION_END logic" step: either re-enters the
/// current top frame's body for another iteration, or pops it and resumes
/// at its `end`.
fn advance_or_exit<C: Callbacks>(
    stack: &mut Vec<SectionFrame>,
    callbacks: &mut C,
    tracer: &EvalTracer,
) -> Result<usize, RenderError<C::Error>> {
    let top_index = stack.len() - 1;
    let (named, index, count, base_udata) = {
        let top = &stack[top_index];
        (top.named, top.index, top.count, top.base_udata)
    };
    if index < count {
        let udata = if named {
            let section = Section {
                udata: base_udata,
                parent: find_ancestor(&stack[..top_index], base_udata),
                body: None,
            };
            callbacks
                .on_section_start(&section, index)
                .map_err(|e| abort_host(callbacks, tracer, e))?
        } else {
            base_udata
        };
        let top = &mut stack[top_index];
        top.udata = udata;
        top.index += 1;
        Ok(top.start + 1)
    } else {
        let end = stack[top_index].end;
        stack.pop();
        Ok(end)
    }
}

fn text_or_report<'p, C: Callbacks>(
    program: &'p Program,
    callbacks: &mut C,
    tracer: &EvalTracer,
    pos: u32,
    len: u32,
) -> Result<&'p str, RenderError<C::Error>> {
    match program.text(pos, len) {
        Ok(text) => Ok(text),
        Err(_) => {
            let err = EvalError::Unknown;
            tracer.error(&err.to_string());
            callbacks.on_formatting_error(&err).map_err(RenderError::Host)?;
            Ok("")
        }
    }
}

/// A VM-internal fault (nesting exceeded, unrecognized opcode): report it
/// to the tracer, give the host a best-effort chance to discard partial
/// output via `on_formatting_error`, then wrap it for the caller.
fn abort<C: Callbacks>(callbacks: &mut C, tracer: &EvalTracer, err: EvalError) -> RenderError<C::Error> {
    tracer.error(&err.to_string());
    let _ = callbacks.on_formatting_error(&err);
    RenderError::Vm(err)
}

/// A host callback itself returned `Err`: report it, give the host the
/// same best-effort cleanup hook, then wrap the original error for the
/// caller.
fn abort_host<C: Callbacks>(callbacks: &mut C, tracer: &EvalTracer, err: C::Error) -> RenderError<C::Error> {
    tracer.error("a callback reported a fatal error");
    let _ = callbacks.on_formatting_error(&EvalError::UserError);
    RenderError::Host(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::debug::CompileTracer;
    use crate::resolver::InMemoryResolver;
    use std::convert::Infallible;

    struct Recorder {
        out: String,
    }

    impl Callbacks for Recorder {
        type Error = Infallible;

        fn on_text(&mut self, text: &str) -> Result<(), Self::Error> {
            self.out.push_str(text);
            Ok(())
        }

        fn on_arg(&mut self, _section: &Section<'_>, name: &str, _escape: bool) -> Result<(), Self::Error> {
            self.out.push_str(&format!("<{name}>"));
            Ok(())
        }

        fn on_section_test(
            &mut self,
            section: &Section<'_>,
            _name: &str,
            inverted: bool,
        ) -> Result<(usize, UserData), Self::Error> {
            Ok((if inverted { 0 } else { 2 }, section.udata()))
        }

        fn on_section_start(&mut self, section: &Section<'_>, _index: usize) -> Result<UserData, Self::Error> {
            Ok(section.udata())
        }

        fn on_formatting_error(&mut self, _error: &EvalError) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    fn run(src: &str) -> String {
        let resolver = InMemoryResolver::new();
        let program =
            Compiler::compile("root", Some(src.as_bytes()), &resolver, CompileTracer::new(false)).unwrap();
        let mut rec = Recorder { out: String::new() };
        evaluate(&program, &mut rec, (0, 0), EvalTracer::new(false)).unwrap();
        rec.out
    }

    #[test]
    fn plain_text_round_trips() {
        assert_eq!(run("hello"), "hello");
    }

    #[test]
    fn section_iterates_test_provided_count() {
        assert_eq!(run("{{#items}}x{{/items}}"), "xx");
    }

    #[test]
    fn inverted_section_is_skipped_when_truthy_count_nonzero() {
        assert_eq!(run("{{^items}}x{{/items}}"), "");
    }

    #[test]
    fn variable_calls_on_arg() {
        assert_eq!(run("{{name}}"), "<name>");
    }
}
