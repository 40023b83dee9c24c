use std::io::{self, Write};

use lumen_session::SessionState;

/// Writes the reply of the turn in flight as it grows.
///
/// Snapshots may skip intermediate states, so each render prints whatever
/// text the reply gained since the last one.
pub struct Renderer<W> {
    out: W,
    printed: usize,
    wrote_any: bool,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            printed: 0,
            wrote_any: false,
        }
    }

    pub fn render(&mut self, state: &SessionState) -> io::Result<()> {
        let Some(reply) = state.current_assistant() else {
            return Ok(());
        };
        if let Some(fresh) = reply.content.get(self.printed..) {
            if !fresh.is_empty() {
                self.out.write_all(fresh.as_bytes())?;
                self.out.flush()?;
                self.printed = reply.content.len();
                self.wrote_any = true;
            }
        }
        Ok(())
    }

    /// Terminate the reply line and list any artifacts it carried.
    pub fn finish(&mut self, state: &SessionState) -> io::Result<()> {
        self.render(state)?;
        if self.wrote_any {
            writeln!(self.out)?;
        }
        if let Some(reply) = state.current_assistant() {
            if !reply.artifacts.is_empty() {
                let kinds: Vec<&str> = reply.artifacts.iter().map(|a| a.kind.as_str()).collect();
                writeln!(self.out, "[artifacts: {}]", kinds.join(", "))?;
            }
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
