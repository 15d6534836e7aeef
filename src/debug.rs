//! Compile-time and evaluation-time tracers.
//!
//! Gated by an explicit boolean (not a global log level), narrating to
//! stderr with a `DEBUG:` prefix and a staged header/footer shape. Kept as
//! a hand-rolled tracer rather than `tracing` since this narrates the
//! inner loop of a hot path step by step; `tracing` is reserved for the
//! CLI binary's whole-program diagnostics (see `src/main.rs`).

/// Traces the Compiler's tag-scanning pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileTracer {
    enabled: bool,
}

impl CompileTracer {
    pub fn new(enabled: bool) -> Self {
        CompileTracer { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn start(&self, filename: &str, len: usize) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG: ═══════════════════════════════════════════════");
        eprintln!("DEBUG: COMPILE START");
        eprintln!("DEBUG: Template: {filename:?} ({len} bytes)");
        eprintln!("DEBUG: ───────────────────────────────────────────────");
    }

    pub fn tag(&self, sigil: char, name: &str, pos: usize) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG:   tag {sigil:?} {name:?} @{pos}");
    }

    pub fn partial(&self, name: &str, candidate: &str, cached: bool) {
        if !self.enabled {
            return;
        }
        if cached {
            eprintln!("DEBUG:   🎯 partial {name:?} -> {candidate:?} (cached)");
        } else {
            eprintln!("DEBUG:   partial {name:?} -> {candidate:?} (loaded)");
        }
    }

    pub fn finish(&self, filename: &str, instruction_count: usize, data_len: usize) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG: ✅ COMPILE COMPLETE");
        eprintln!(
            "DEBUG: 🎯 {filename:?}: {instruction_count} instructions, {data_len} data bytes"
        );
        eprintln!("DEBUG: ═══════════════════════════════════════════════");
    }

    pub fn error(&self, message: &str) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG: ❌ COMPILE ERROR: {message}");
    }
}

/// Traces the Evaluator's VM loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvalTracer {
    enabled: bool,
}

impl EvalTracer {
    pub fn new(enabled: bool) -> Self {
        EvalTracer { enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG: ═══════════════════════════════════════════════");
        eprintln!("DEBUG: EVAL START");
    }

    pub fn step(&self, pos: usize, depth: usize, detail: &str) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG:   [{pos:>5}] depth={depth} {detail}");
    }

    pub fn finish(&self) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG: ✅ EVAL COMPLETE");
        eprintln!("DEBUG: ═══════════════════════════════════════════════");
    }

    pub fn error(&self, message: &str) {
        if !self.enabled {
            return;
        }
        eprintln!("DEBUG: ❌ EVAL ERROR: {message}");
    }
}
