//! FileCheck-style validation of generated IL.
//!
//! Check files carry `; RUN:` lines naming a kernel plus flags and `; CHECK*`
//! directives matched against the generated text, similar to LLVM's FileCheck
//! but implemented in a Rust-native way. Supported directives: `CHECK`,
//! `CHECK-LABEL`, `CHECK-NEXT`, `CHECK-NOT`, `CHECK-COUNT-<n>`, `CHECK-EMPTY`
//! and `COM`. Patterns match as substrings of a line.

use crate::driver::Device;
use crate::il::GeneratorOptions;
use crate::kernels;

/// A CHECK directive extracted from a check file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckDirective {
    /// CHECK: pattern - Match pattern on some later line
    Check(String),
    /// CHECK-LABEL: pattern - Label for a section
    CheckLabel(String),
    /// CHECK-NEXT: pattern - Match on the next line
    CheckNext(String),
    /// CHECK-NOT: pattern - Absent until the next positive match
    CheckNot(String),
    /// CHECK-COUNT-n: pattern - Match on n further lines, in order
    CheckCount(usize, String),
    /// CHECK-EMPTY - Match empty line
    CheckEmpty,
    /// COM: comment - Comment, ignored
    Comment(String),
}

/// A RUN directive: kernel name plus generator flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDirective {
    pub command: String,
    pub args: Vec<String>,
}

/// Test specification extracted from a check file
#[derive(Debug)]
pub struct TestSpec {
    pub run_directives: Vec<RunDirective>,
    pub check_directives: Vec<CheckDirective>,
}

impl TestSpec {
    /// Parse a check file
    pub fn parse(content: &str) -> Result<Self, String> {
        let mut run_directives = Vec::new();
        let mut check_directives = Vec::new();

        for (number, line) in content.lines().enumerate() {
            let Some(directive) = line.trim().strip_prefix(';') else {
                continue;
            };
            let directive = directive.trim_start();

            if let Some(run_cmd) = directive.strip_prefix("RUN:") {
                let parts: Vec<&str> = run_cmd.split_whitespace().collect();
                if let Some((command, args)) = parts.split_first() {
                    run_directives.push(RunDirective {
                        command: command.to_string(),
                        args: args.iter().map(|s| s.to_string()).collect(),
                    });
                }
            } else if let Some(pattern) = directive.strip_prefix("CHECK-LABEL:") {
                check_directives.push(CheckDirective::CheckLabel(pattern.trim().to_string()));
            } else if let Some(pattern) = directive.strip_prefix("CHECK-NEXT:") {
                check_directives.push(CheckDirective::CheckNext(pattern.trim().to_string()));
            } else if let Some(pattern) = directive.strip_prefix("CHECK-NOT:") {
                check_directives.push(CheckDirective::CheckNot(pattern.trim().to_string()));
            } else if let Some(rest) = directive.strip_prefix("CHECK-COUNT-") {
                let (count, pattern) = rest
                    .split_once(':')
                    .ok_or_else(|| format!("line {}: malformed CHECK-COUNT", number + 1))?;
                let count = count
                    .parse::<usize>()
                    .map_err(|e| format!("line {}: bad CHECK-COUNT: {e}", number + 1))?;
                check_directives.push(CheckDirective::CheckCount(count, pattern.trim().to_string()));
            } else if directive.starts_with("CHECK-EMPTY") {
                check_directives.push(CheckDirective::CheckEmpty);
            } else if let Some(pattern) = directive.strip_prefix("CHECK:") {
                check_directives.push(CheckDirective::Check(pattern.trim().to_string()));
            } else if let Some(comment) = directive.strip_prefix("COM:") {
                check_directives.push(CheckDirective::Comment(comment.trim().to_string()));
            } else if directive.starts_with("CHECK") {
                return Err(format!("line {}: unknown directive '{directive}'", number + 1));
            }
        }

        Ok(TestSpec {
            run_directives,
            check_directives,
        })
    }
}

/// Test runner that generates kernels and validates their output
pub struct TestRunner {
    verbose: bool,
}

impl TestRunner {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Run every RUN line of `spec` and validate its output
    pub fn run_test(&self, spec: &TestSpec) -> Result<(), String> {
        if spec.run_directives.is_empty() {
            return Err("no RUN directive".to_string());
        }
        for run_dir in &spec.run_directives {
            let output = self.execute_command(run_dir)?;
            self.validate_output(&output, &spec.check_directives)
                .map_err(|e| format!("{}: {e}", run_dir.command))?;
        }
        Ok(())
    }

    /// Generate the kernel named by a RUN directive
    pub fn execute_command(&self, run_dir: &RunDirective) -> Result<String, String> {
        let kernel = kernels::find(&run_dir.command)
            .ok_or_else(|| format!("unknown kernel '{}'", run_dir.command))?;

        let mut device = None;
        let mut options = GeneratorOptions::default();
        let mut header = true;
        let mut code = true;
        let mut args = run_dir.args.iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--device" => {
                    let name = args.next().ok_or("--device needs a value")?;
                    device = Some(
                        Device::by_name(name).ok_or_else(|| format!("unknown device '{name}'"))?,
                    );
                }
                "--threads" => {
                    let value = args.next().ok_or("--threads needs a value")?;
                    options.threads_per_group =
                        Some(value.parse().map_err(|e| format!("--threads: {e}"))?);
                }
                "--header-only" => code = false,
                "--code-only" => header = false,
                other => return Err(format!("unknown flag '{other}'")),
            }
        }

        let generated = kernels::generate(kernel, device.map(|d| d.query()), &options)
            .map_err(|e| e.to_string())?;
        let mut output = String::new();
        if header {
            output.push_str(&generated.program.header);
        }
        if code {
            output.push_str(&generated.program.code);
        }
        Ok(output)
    }

    fn check_absent(
        lines: &[&str],
        range: std::ops::Range<usize>,
        pending: &mut Vec<String>,
    ) -> Result<(), String> {
        for pattern in pending.drain(..) {
            if let Some(line) = lines[range.clone()].iter().find(|l| l.contains(&pattern)) {
                return Err(format!("CHECK-NOT: pattern '{pattern}' found in '{line}'"));
            }
        }
        Ok(())
    }

    /// Validate output against CHECK directives
    pub fn validate_output(
        &self,
        output: &str,
        directives: &[CheckDirective],
    ) -> Result<(), String> {
        let output_lines: Vec<&str> = output.lines().collect();
        let mut line_idx = 0;
        let mut pending_not: Vec<String> = Vec::new();

        for directive in directives {
            match directive {
                CheckDirective::Comment(_) => continue,

                CheckDirective::CheckNot(pattern) => pending_not.push(pattern.clone()),

                CheckDirective::Check(pattern) | CheckDirective::CheckLabel(pattern) => {
                    let found = output_lines
                        .iter()
                        .skip(line_idx)
                        .position(|line| line.contains(pattern.as_str()));

                    match found {
                        Some(idx) => {
                            Self::check_absent(
                                &output_lines,
                                line_idx..line_idx + idx,
                                &mut pending_not,
                            )?;
                            line_idx += idx + 1;
                            if self.verbose {
                                println!("CHECK: '{}' found at line {}", pattern, line_idx - 1);
                            }
                        }
                        None => {
                            return Err(format!(
                                "CHECK: pattern '{}' not found in output",
                                pattern
                            ));
                        }
                    }
                }

                CheckDirective::CheckCount(count, pattern) => {
                    for n in 0..*count {
                        let found = output_lines
                            .iter()
                            .skip(line_idx)
                            .position(|line| line.contains(pattern.as_str()));
                        let Some(idx) = found else {
                            return Err(format!(
                                "CHECK-COUNT-{}: pattern '{}' matched only {} times",
                                count, pattern, n
                            ));
                        };
                        Self::check_absent(
                            &output_lines,
                            line_idx..line_idx + idx,
                            &mut pending_not,
                        )?;
                        line_idx += idx + 1;
                    }
                }

                CheckDirective::CheckNext(pattern) => {
                    if line_idx >= output_lines.len() {
                        return Err(format!("CHECK-NEXT: no more lines, expected '{}'", pattern));
                    }

                    let line = output_lines[line_idx];
                    if !line.contains(pattern.as_str()) {
                        return Err(format!(
                            "CHECK-NEXT: expected '{}' but got '{}'",
                            pattern, line
                        ));
                    }

                    if self.verbose {
                        println!("CHECK-NEXT: '{}' matches at line {}", pattern, line_idx);
                    }
                    line_idx += 1;
                }

                CheckDirective::CheckEmpty => {
                    if line_idx >= output_lines.len() {
                        continue;
                    }

                    let line = output_lines[line_idx];
                    if !line.trim().is_empty() {
                        return Err(format!(
                            "CHECK-EMPTY: expected empty line but got '{}'",
                            line
                        ));
                    }
                    line_idx += 1;
                }
            }
        }

        let end = output_lines.len();
        Self::check_absent(&output_lines, line_idx.min(end)..end, &mut pending_not)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_directives() {
        let content = r#"; RUN: saxpy --device cypress
; CHECK: il_cs_2_0
; CHECK-LABEL: umul
; CHECK-NEXT: uav_raw_load_id(0)
; CHECK-NOT: call
; CHECK-COUNT-2: uav_raw
; COM: This is a comment
"#;

        let spec = TestSpec::parse(content).unwrap();
        assert_eq!(spec.run_directives.len(), 1);
        assert_eq!(spec.run_directives[0].args, vec!["--device", "cypress"]);
        assert_eq!(spec.check_directives.len(), 6);
        assert_eq!(
            spec.check_directives[4],
            CheckDirective::CheckCount(2, "uav_raw".to_string())
        );
    }

    #[test]
    fn test_unknown_directive_rejected() {
        assert!(TestSpec::parse("; CHECK-SAME: x").is_err());
        assert!(TestSpec::parse("; CHECK-COUNT-x: y").is_err());
    }

    #[test]
    fn test_check_matching() {
        let runner = TestRunner::new(false);
        let output = "whileloop\nbreakc_relop(gt) r1.x, l3.x\nendloop\n";

        let directives = vec![
            CheckDirective::Check("whileloop".to_string()),
            CheckDirective::CheckNext("breakc_relop(gt)".to_string()),
            CheckDirective::CheckNot("break_logicalz".to_string()),
            CheckDirective::Check("endloop".to_string()),
        ];

        runner.validate_output(output, &directives).unwrap();
    }

    #[test]
    fn test_check_next_failure() {
        let runner = TestRunner::new(false);
        let output = "Line 1\nLine 2\nLine 3\n";

        let directives = vec![
            CheckDirective::Check("Line 1".to_string()),
            CheckDirective::CheckNext("Line 3".to_string()),
        ];

        let result = runner.validate_output(output, &directives);
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("CHECK-NEXT"));
    }

    #[test]
    fn test_check_not_and_count() {
        let runner = TestRunner::new(false);
        let output = "mov r0.x, l2.x\ncall 1\nmov r1.x, r0.x\ncall 1\nend\n";

        let ok = vec![CheckDirective::CheckCount(2, "call 1".to_string())];
        runner.validate_output(output, &ok).unwrap();

        let too_many = vec![CheckDirective::CheckCount(3, "call 1".to_string())];
        assert!(runner.validate_output(output, &too_many).is_err());

        let trailing_not = vec![
            CheckDirective::Check("mov r1.x".to_string()),
            CheckDirective::CheckNot("call".to_string()),
        ];
        let err = runner.validate_output(output, &trailing_not).unwrap_err();
        assert!(err.contains("CHECK-NOT"));
    }

    #[test]
    fn test_execute_unknown_kernel() {
        let runner = TestRunner::new(false);
        let run = RunDirective {
            command: "nope".to_string(),
            args: Vec::new(),
        };
        assert!(runner.execute_command(&run).is_err());
    }
}
