//! Counter backend that shells out to `typeperf`.
//!
//! `typeperf` cannot address a process by pid, only by its volatile instance
//! name (`image#n`), so this backend always needs a resolved identity. The
//! pid counter is queried alongside the usage counters so the resolver can
//! check which process the name currently points at.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::{SnapshotSource, available_cpus};
use crate::error::{Result, SampleError};
use crate::usage::snapshot::{CounterIdentity, Snapshot};

pub const DEFAULT_COMMAND: &str = "typeperf";
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

// typeperf prints these when the instance in a counter path does not exist.
const NOT_PRESENT_MARKERS: [&str; 2] = ["The data is not valid", "No valid counters"];

/// The values carried by one typeperf data line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CounterLine {
    pub pid: u32,
    pub cpu_percent: f64,
    pub private_bytes: u64,
    pub virtual_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct TypeperfSource {
    command: String,
    timeout: Duration,
}

impl Default for TypeperfSource {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND, DEFAULT_QUERY_TIMEOUT)
    }
}

impl TypeperfSource {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Counter paths plus `-sc 1` so typeperf reports one sample and exits.
    pub fn counter_args(instance: &str) -> Vec<String> {
        vec![
            format!("\\Process({instance})\\ID Process"),
            format!("\\Process({instance})\\% Processor Time"),
            format!("\\Process({instance})\\Private Bytes"),
            format!("\\Process({instance})\\Virtual Bytes"),
            "-sc".to_string(),
            "1".to_string(),
        ]
    }

    /// Shell-style rendering of the invocation, for diagnostics.
    pub fn command_line(&self, instance: &str) -> String {
        let mut line = self.command.clone();
        for arg in Self::counter_args(instance) {
            line.push(' ');
            if arg.contains(' ') {
                line.push('"');
                line.push_str(&arg);
                line.push('"');
            } else {
                line.push_str(&arg);
            }
        }
        line
    }

    fn run_bounded(&self, args: &[String]) -> Result<(ExitStatus, String)> {
        let mut child = Command::new(&self.command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SampleError::Backend(format!("unable to start `{}`: {e}", self.command)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| SampleError::Backend("child stdout was not captured".into()))?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    abandon(&mut child);
                    return Err(SampleError::Backend(format!(
                        "`{}` did not finish within {:?}",
                        self.command, self.timeout
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    abandon(&mut child);
                    return Err(err.into());
                }
            }
        };

        let bytes = reader
            .join()
            .map_err(|_| SampleError::Backend("stdout reader panicked".into()))??;
        Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
    }
}

// Kill and reap so no zombie outlives a failed query.
fn abandon(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl SnapshotSource for TypeperfSource {
    fn requires_identity(&self) -> bool {
        true
    }

    fn query(&self, identity: Option<&CounterIdentity>) -> Result<Snapshot> {
        #[cfg(feature = "perf-tracing")]
        let _query_span = tracing::debug_span!("source.query", backend = "typeperf").entered();

        let identity = identity.ok_or_else(|| {
            SampleError::Backend("typeperf needs a counter instance name".into())
        })?;

        let (status, stdout) = self.run_bounded(&Self::counter_args(&identity.name))?;
        let line = interpret_output(status.success(), &stdout, &identity.name)?;

        Ok(Snapshot {
            timestamp: Instant::now(),
            process_kernel_ticks: 0,
            process_user_ticks: 0,
            system_kernel_ticks: 0,
            system_user_ticks: 0,
            system_idle_ticks: 0,
            resident_bytes: line.private_bytes,
            private_bytes: line.private_bytes,
            virtual_bytes: line.virtual_bytes,
            resolved_pid: line.pid,
            cpu_count: available_cpus(),
            reported_cpu_percent: Some(line.cpu_percent),
        })
    }
}

/// Classifies a finished typeperf run.
///
/// A missing instance is reported through the output text, usually with a
/// failing exit status, and must not be confused with the command failing.
pub fn interpret_output(success: bool, stdout: &str, instance: &str) -> Result<CounterLine> {
    if NOT_PRESENT_MARKERS
        .iter()
        .any(|marker| stdout.contains(marker))
    {
        return Err(SampleError::InstanceMissing(instance.to_string()));
    }
    if !success {
        let detail = stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no output");
        return Err(SampleError::Backend(format!("typeperf failed: {detail}")));
    }
    parse_output(stdout)
}

/// Extracts the data line that follows the CSV header.
pub fn parse_output(stdout: &str) -> Result<CounterLine> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let _header = lines
        .next()
        .ok_or_else(|| SampleError::Parse("empty typeperf output".into()))?;
    let data = lines
        .next()
        .ok_or_else(|| SampleError::Parse("typeperf output has no data line".into()))?;
    parse_line(data)
}

/// Parses `"<date> <time>","<pid>","<cpu>","<private>","<virtual>"`.
///
/// Every number is printed as a decimal float, integral or not.
pub fn parse_line(line: &str) -> Result<CounterLine> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 5 {
        return Err(SampleError::Parse(format!(
            "expected 5 fields, found {}: {line}",
            fields.len()
        )));
    }

    let pid = number(fields[1], "pid")?;
    let cpu_percent = number(fields[2], "percent cpu")?;
    let private_bytes = number(fields[3], "private bytes")?;
    let virtual_bytes = number(fields[4], "virtual bytes")?;

    if pid < 0.0 || pid > f64::from(u32::MAX) {
        return Err(SampleError::Parse(format!("pid out of range: {}", fields[1])));
    }

    Ok(CounterLine {
        pid: pid as u32,
        cpu_percent,
        private_bytes: private_bytes.max(0.0) as u64,
        virtual_bytes: virtual_bytes.max(0.0) as u64,
    })
}

fn number(raw: &str, what: &str) -> Result<f64> {
    let value = raw.trim().trim_matches('"');
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(n),
        _ => Err(SampleError::Parse(format!("unable to parse {what}: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_OUTPUT: &str = "\r\n\
\"(PDH-CSV 4.0)\",\"\\\\HOST\\Process(gnatsd#1)\\ID Process\",\"\\\\HOST\\Process(gnatsd#1)\\% Processor Time\",\"\\\\HOST\\Process(gnatsd#1)\\Private Bytes\",\"\\\\HOST\\Process(gnatsd#1)\\Virtual Bytes\"\r\n\
\"04/17/2016 15:38:00.016\",\"5123.000000\",\"12.500000\",\"2048000.000000\",\"4096000.000000\"\r\n\
Exiting, please wait...\r\n\
The command completed successfully.\r\n";

    #[test]
    fn parses_full_command_output() {
        let line = parse_output(SAMPLE_OUTPUT).unwrap();
        assert_eq!(line.pid, 5123);
        assert!((line.cpu_percent - 12.5).abs() < 1e-9);
        assert_eq!(line.private_bytes, 2_048_000);
        assert_eq!(line.virtual_bytes, 4_096_000);
    }

    #[test]
    fn fields_with_spaces_after_commas() {
        let line = parse_line(
            r#""04/17/2016 15.38.00.016", "5123.00000", "1.2340000", "123.00000", "123.00000""#,
        )
        .unwrap();
        assert_eq!(line.pid, 5123);
        assert!((line.cpu_percent - 1.234).abs() < 1e-9);
    }

    #[test]
    fn non_numeric_field_is_a_parse_error() {
        let err = parse_line(r#""date","abc","1.0","2.0","3.0""#).unwrap_err();
        assert!(matches!(err, SampleError::Parse(ref m) if m.contains("pid")));
    }

    #[test]
    fn header_without_data_is_a_parse_error() {
        let err = parse_output("\r\n\"(PDH-CSV 4.0)\",\"x\"\r\n").unwrap_err();
        assert!(matches!(err, SampleError::Parse(_)));
    }

    #[test]
    fn missing_instance_is_distinguished_from_failure() {
        let missing = interpret_output(
            false,
            "\r\nError: The data is not valid.\r\n",
            "gnatsd#3",
        )
        .unwrap_err();
        assert!(matches!(missing, SampleError::InstanceMissing(ref n) if n == "gnatsd#3"));

        let failed = interpret_output(false, "Error: Access is denied.\r\n", "gnatsd#3")
            .unwrap_err();
        assert!(matches!(failed, SampleError::Backend(ref m) if m.contains("Access is denied")));
    }

    #[test]
    fn no_valid_counters_means_instance_missing() {
        let err = interpret_output(false, "\r\nError: No valid counters.\r\n", "gnatsd#0")
            .unwrap_err();
        assert!(err.is_instance_missing());
    }

    #[cfg(unix)]
    #[test]
    fn hung_command_is_killed_at_the_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let script = std::env::temp_dir().join(format!("procusage-hang-{}.sh", std::process::id()));
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = TypeperfSource::new(script.to_string_lossy(), Duration::from_millis(300));
        let identity = CounterIdentity {
            name: "x#0".into(),
            resolved_pid: 0,
        };
        let started = Instant::now();
        let err = source.query(Some(&identity)).unwrap_err();
        let elapsed = started.elapsed();
        let _ = std::fs::remove_file(&script);

        assert!(
            matches!(err, SampleError::Backend(ref m) if m.contains("did not finish")),
            "{err:?}"
        );
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    }

    #[test]
    fn missing_command_is_a_backend_error() {
        let source = TypeperfSource::new(
            "procusage-test-command-that-does-not-exist",
            Duration::from_secs(1),
        );
        let identity = CounterIdentity {
            name: "x#0".into(),
            resolved_pid: 0,
        };
        let err = source.query(Some(&identity)).unwrap_err();
        assert!(matches!(err, SampleError::Backend(_)));
    }

    #[test]
    fn query_without_identity_is_rejected() {
        let err = TypeperfSource::default().query(None).unwrap_err();
        assert!(matches!(err, SampleError::Backend(_)));
    }
}
