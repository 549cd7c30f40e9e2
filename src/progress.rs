use std::fmt::Display;

use serde::Serialize;

#[derive(Serialize)]
pub struct ApplicationStarted {
    pub name: String,
    pub kind: String,
}

impl Display for ApplicationStarted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Running {} ({})", self.name, self.kind)
    }
}

#[derive(Serialize)]
pub struct ApplicationFinished {
    pub name: String,
    pub success: bool,
    pub action_count: usize,
    pub duration_ms: u128,
}

impl Display for ApplicationFinished {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.success { "passed" } else { "failed" };
        write!(
            f,
            "{} {} - {} action(s) in {}ms",
            self.name, state, self.action_count, self.duration_ms
        )
    }
}

#[derive(Serialize)]
pub struct RunFinished {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub report_path: String,
}

impl Display for RunFinished {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run finished")?;
        writeln!(f, "\tapplications: {}", self.total)?;
        writeln!(f, "\tpassed: {}", self.passed)?;
        writeln!(f, "\tfailed: {}", self.failed)?;
        write!(f, "\treport: {}", self.report_path)
    }
}
