use crate::exec::{CommandOutput, ProcessRunner};
use std::cell::RefCell;
use std::io;

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub capture_output: bool,
}

impl RecordedCall {
    /// The command line as the host shell sees it (last SSH argument, or the local argv).
    pub fn remote_line(&self) -> String {
        if self.program == "ssh" {
            return self.args.last().cloned().unwrap_or_default();
        }
        if self.program == "sh" && self.args.first().map(String::as_str) == Some("-c") {
            return self.args.get(1).cloned().unwrap_or_default();
        }
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

#[derive(Default)]
pub struct MockRunner {
    calls: RefCell<Vec<RecordedCall>>,
    outputs: RefCell<Vec<CommandOutput>>,
    spawn_error: RefCell<Option<io::ErrorKind>>,
}

impl MockRunner {
    pub fn push_output(&self, output: CommandOutput) {
        self.outputs.borrow_mut().push(output);
    }

    pub fn fail_spawn(&self, kind: io::ErrorKind) {
        *self.spawn_error.borrow_mut() = Some(kind);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }

    pub fn remote_lines(&self) -> Vec<String> {
        self.calls().iter().map(RecordedCall::remote_line).collect()
    }
}

impl ProcessRunner for MockRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        capture_output: bool,
    ) -> Result<CommandOutput, io::Error> {
        self.calls.borrow_mut().push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
            capture_output,
        });
        if let Some(kind) = *self.spawn_error.borrow() {
            return Err(io::Error::new(kind, "spawn failed"));
        }
        let mut queued = self.outputs.borrow_mut();
        if queued.is_empty() {
            return Ok(ok(""));
        }
        Ok(queued.remove(0))
    }
}

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status_code: 0,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

pub fn failed(status_code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status_code,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}
