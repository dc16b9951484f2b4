//! Typed shell script model.
//!
//! Builders assemble a [`Script`] out of [`ShellStep`] values; a single
//! serializer ([`Script::render`]) turns them into POSIX `sh` text. Tests can
//! assert against the structured steps instead of substring-matching the
//! rendered output.
//!
//! Every dynamic value (paths, gem names, manifest lines) is quoted with
//! `shell-escape` when rendered. Command strings carried by
//! [`ShellStep::RunOrExit`] and [`ShellStep::Privileged`] are emitted as-is,
//! so builders quote their own arguments.

use std::fmt;

const INDENT: &str = "  ";

/// Quote a value for a POSIX shell. Safe strings are left untouched.
pub fn quote(value: &str) -> String {
    shell_escape::escape(value.into()).into_owned()
}

/// Privilege-elevation wrapper applied to privileged steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Elevation {
    /// Elevation prefix, e.g. `sudo -E`. `None` runs commands as-is.
    pub prefix: Option<String>,
    /// Inline environment assignments exported for the single command.
    pub env: Vec<(String, String)>,
}

impl Elevation {
    /// No elevation and no inline environment.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn sudo(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Wrap a command line.
    ///
    /// With inline environment the command goes through `env` so the
    /// assignments survive the elevation boundary:
    /// `sudo -E env http_proxy=... yum -y install ruby`.
    pub fn wrap(&self, command: &str) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(prefix) = &self.prefix {
            parts.push(prefix.clone());
        }
        if !self.env.is_empty() {
            parts.push("env".to_string());
            for (key, value) in &self.env {
                parts.push(format!("{}={}", key, quote(value)));
            }
        }
        parts.push(command.to_string());
        parts.join(" ")
    }
}

/// A shell test used by [`ShellStep::If`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The binary is not on `PATH`.
    CommandMissing(String),
    /// A regular file exists.
    FileExists(String),
    /// A directory exists.
    DirExists(String),
    /// A file exists and contains the fixed string.
    FileContains { path: String, needle: String },
    /// The gem is not reported as installed (`gem list -i`), checked with
    /// the script's elevation.
    GemMissing(String),
    /// Any of the nested conditions holds.
    Any(Vec<Condition>),
}

impl Condition {
    fn render(&self, elevation: &Elevation) -> String {
        match self {
            Self::CommandMissing(binary) => {
                format!("! command -v {} >/dev/null 2>&1", quote(binary))
            }
            Self::FileExists(path) => format!("[ -f {} ]", quote(path)),
            Self::DirExists(path) => format!("[ -d {} ]", quote(path)),
            Self::FileContains { path, needle } => {
                format!("grep -qs {} {}", quote(needle), quote(path))
            }
            Self::GemMissing(gem) => format!(
                "! {} >/dev/null 2>&1",
                elevation.wrap(&format!("gem list -i {}", quote(gem)))
            ),
            Self::Any(conditions) => conditions
                .iter()
                .map(|c| c.render(elevation))
                .collect::<Vec<_>>()
                .join(" || "),
        }
    }
}

/// One typed shell operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellStep {
    /// Run a command line and abort the script with its exit code on failure.
    RunOrExit(String),
    /// Run a command line through the script's elevation.
    Privileged(String),
    /// Print an informational message on stdout.
    Echo(String),
    /// Print a diagnostic on stderr and terminate with `code`.
    Fail { message: String, code: i32 },
    /// Change the working directory.
    ChangeDir(String),
    /// Conditional block.
    If {
        condition: Condition,
        then: Vec<ShellStep>,
        otherwise: Vec<ShellStep>,
    },
    /// Remove a single file (privileged).
    RemoveFile(String),
    /// Append one line to a file (privileged write).
    AppendLine { path: String, line: String },
    /// Recursively remove a directory (unprivileged).
    RemoveDir(String),
    /// Emit text exactly as given.
    Verbatim(String),
}

impl ShellStep {
    /// Convenience constructor for an `if` without an `else` branch.
    pub fn when(condition: Condition, then: Vec<ShellStep>) -> Self {
        Self::If {
            condition,
            then,
            otherwise: Vec::new(),
        }
    }

    fn render_into(&self, elevation: &Elevation, depth: usize, out: &mut Vec<String>) {
        let pad = INDENT.repeat(depth);
        match self {
            Self::RunOrExit(command) => out.push(format!("{pad}{command} || exit $?")),
            Self::Privileged(command) => out.push(format!("{pad}{}", elevation.wrap(command))),
            Self::Echo(message) => out.push(format!("{pad}echo {}", quote(message))),
            Self::Fail { message, code } => {
                out.push(format!("{pad}echo {} >&2", quote(message)));
                out.push(format!("{pad}exit {code}"));
            }
            Self::ChangeDir(path) => out.push(format!("{pad}cd {}", quote(path))),
            Self::If {
                condition,
                then,
                otherwise,
            } => {
                out.push(format!("{pad}if {}; then", condition.render(elevation)));
                render_block(then, elevation, depth + 1, out);
                if !otherwise.is_empty() {
                    out.push(format!("{pad}else"));
                    render_block(otherwise, elevation, depth + 1, out);
                }
                out.push(format!("{pad}fi"));
            }
            Self::RemoveFile(path) => out.push(format!(
                "{pad}{}",
                elevation.wrap(&format!("rm -f {}", quote(path)))
            )),
            Self::AppendLine { path, line } => out.push(format!(
                "{pad}printf '%s\\n' {} | {} >/dev/null",
                quote(line),
                elevation.wrap(&format!("tee -a {}", quote(path)))
            )),
            Self::RemoveDir(path) => out.push(format!("{pad}rm -rf {}", quote(path))),
            Self::Verbatim(text) => out.push(text.clone()),
        }
    }
}

// An empty branch is a syntax error in sh, so it becomes a no-op.
fn render_block(steps: &[ShellStep], elevation: &Elevation, depth: usize, out: &mut Vec<String>) {
    if steps.is_empty() {
        out.push(format!("{}:", INDENT.repeat(depth)));
        return;
    }
    for step in steps {
        step.render_into(elevation, depth, out);
    }
}

/// An ordered sequence of shell steps plus the elevation used for the
/// privileged ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    steps: Vec<ShellStep>,
    elevation: Elevation,
}

impl Script {
    pub fn new(elevation: Elevation) -> Self {
        Self {
            steps: Vec::new(),
            elevation,
        }
    }

    /// A script consisting of user-supplied text, rendered unchanged.
    pub fn verbatim(text: impl Into<String>) -> Self {
        Self {
            steps: vec![ShellStep::Verbatim(text.into())],
            elevation: Elevation::none(),
        }
    }

    pub fn push(&mut self, step: ShellStep) {
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[ShellStep] {
        &self.steps
    }

    /// Depth-first walk over every step, including nested branches.
    pub fn walk(&self) -> Vec<&ShellStep> {
        fn visit<'a>(steps: &'a [ShellStep], acc: &mut Vec<&'a ShellStep>) {
            for step in steps {
                acc.push(step);
                if let ShellStep::If {
                    then, otherwise, ..
                } = step
                {
                    visit(then, acc);
                    visit(otherwise, acc);
                }
            }
        }
        let mut acc = Vec::new();
        visit(&self.steps, &mut acc);
        acc
    }

    /// Render to shell text, one command per line, no trailing newline.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        for step in &self.steps {
            step.render_into(&self.elevation, 0, &mut lines);
        }
        lines.join("\n")
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
