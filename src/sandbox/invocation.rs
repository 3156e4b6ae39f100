use anyhow::{Context, Result};

/// A single argv to execute inside a sandbox. Arguments are kept as a
/// structured list; user text is never spliced into a shell string except as
/// one atomically quoted literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new<I, A>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Full argv, program first, for the runtime exec boundary.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// Render as one quoted shell line. Fails on embedded NUL bytes.
    pub fn render(&self) -> Result<String> {
        let words: Vec<&str> = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect();
        shlex::try_join(words).context("invocation contains a NUL byte")
    }
}

/// Run a user command line through the restricted shell. The shell receives
/// the whole line as its single argument and is the boundary that interprets
/// it.
pub fn shell_command(shell: &str, message: &str) -> Invocation {
    Invocation::new(shell, [message])
}

/// Feed editor text into a command waiting on an interactive prompt.
///
/// The script swaps the git editor hook to the read-input script, pipes the
/// payload into the pending command (re-run through the restricted shell),
/// then restores the write-output hook whether or not the command succeeded.
pub fn editor_command(
    shell: &str,
    input_hook: &str,
    output_hook: &str,
    payload: &str,
    pending: &str,
) -> Result<Invocation> {
    let payload = shlex::try_quote(payload).context("editor payload contains a NUL byte")?;
    let pending = shlex::try_quote(pending).context("pending command contains a NUL byte")?;

    let script = format!(
        "git config --global core.editor {input_hook} && \
         printf '%s\\n' {payload} | {shell} {pending}; \
         git config --global core.editor {output_hook}"
    );

    Ok(Invocation::new("sh", ["-c", &script]))
}

/// Render an ordered batch as one script, one line per invocation. Used by
/// replay, which submits the whole history as a single combined invocation.
/// A failing line does not stop the ones after it.
pub fn render_batch(invocations: &[Invocation]) -> Result<Vec<String>> {
    let mut lines = Vec::with_capacity(invocations.len());
    for invocation in invocations {
        lines.push(invocation.render()?);
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHELL: &str = "/usr/local/bin/restricted-shell";

    #[test]
    fn shell_command_passes_line_as_single_argument() {
        let invocation = shell_command(SHELL, "git commit -m \"oops\"");
        assert_eq!(invocation.program(), SHELL);
        assert_eq!(invocation.args(), ["git commit -m \"oops\""]);
    }

    #[test]
    fn editor_command_quotes_payload_atomically() {
        let invocation = editor_command(
            SHELL,
            "/editor/input.sh",
            "/editor/output.sh",
            "fix: don't panic",
            "git commit",
        )
        .unwrap();

        assert_eq!(invocation.program(), "sh");
        assert_eq!(invocation.args()[0], "-c");
        let script = &invocation.args()[1];
        // The apostrophe must survive inside one quoted word
        assert!(script.contains("\"fix: don't panic\"") || script.contains("'fix: don'\\''t panic'"));
        assert!(script.contains("core.editor /editor/input.sh"));
        assert!(script.contains("core.editor /editor/output.sh"));
        assert!(script.contains(SHELL));
    }

    #[test]
    fn editor_command_rejects_nul_bytes() {
        let err = editor_command(
            SHELL,
            "/editor/input.sh",
            "/editor/output.sh",
            "bad\0payload",
            "git commit",
        );
        assert!(err.is_err());
    }

    #[test]
    fn render_quotes_spaces() {
        let invocation = shell_command(SHELL, "git commit -m wip");
        let line = invocation.render().unwrap();
        assert_eq!(line, format!("{SHELL} \"git commit -m wip\""));
    }

    #[test]
    fn render_batch_keeps_order_and_count() {
        let invocations = vec![
            shell_command(SHELL, "git init"),
            shell_command(SHELL, "git status"),
        ];
        let lines = render_batch(&invocations).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("git init"));
        assert!(lines[1].contains("git status"));
    }
}
