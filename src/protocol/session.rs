//! Test session with the coordinator
//!
//! Connects (with retries), introduces the solution, then runs one test per
//! incoming descriptor and reports each outcome before reading the next one.

use anyhow::Result;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::frame::{parse_descriptor, FramedStream};
use crate::config::ClientConfig;
use crate::domain::{SessionError, TestRequest};
use crate::fixtures::TestSuite;
use crate::reporter::{children_swap_mb, TestReport};
use crate::runner::{RunLimits, Runner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    AwaitingTest,
    Executing,
    Reporting,
    Finished,
}

/// Why a session reached `Finished` without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Every connect attempt failed
    ConnectFailed,
    /// As many tests ran as there are fixtures
    TestsExhausted,
    /// The last reported test had this nonzero return code
    NonZeroReturnCode(i32),
    /// The coordinator sent an unparsable or empty message
    MalformedTest,
    /// The coordinator closed the stream
    StreamClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub tests_run: usize,
    pub reason: FinishReason,
}

/// Drives one session: tests run strictly one after another
pub struct SolutionTester<R> {
    config: ClientConfig,
    tests: TestSuite,
    runner: R,
    state: SessionState,
    tests_run: usize,
}

impl<R: Runner> SolutionTester<R> {
    pub fn new(config: ClientConfig, tests: TestSuite, runner: R) -> Self {
        Self {
            config,
            tests,
            runner,
            state: SessionState::Disconnected,
            tests_run: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the whole session.
    ///
    /// Failing to connect is a normal finish. Protocol violations and
    /// unexpected failures are logged and returned.
    pub async fn test_solution(&mut self) -> Result<SessionSummary> {
        info!(
            "Trying to connect to the task container on: {}:{}",
            self.config.host, self.config.port
        );

        let Some(stream) = self.connect().await else {
            self.transition(SessionState::Finished);
            return Ok(self.summary(FinishReason::ConnectFailed));
        };
        info!("Connected.");
        self.transition(SessionState::Connected);

        let (reader, writer) = stream.into_split();
        let mut framed = FramedStream::new(reader, writer, self.config.truncate_to);

        let result = self.exchange(&mut framed).await;
        self.transition(SessionState::Finished);

        match result {
            Ok(reason) => {
                info!("Ran {} tests. Finishing ({:?}).", self.tests_run, reason);
                Ok(self.summary(reason))
            }
            Err(e) => {
                error!("Got unexpected error: {:#}", e);
                Err(e)
            }
        }
    }

    async fn connect(&mut self) -> Option<TcpStream> {
        self.transition(SessionState::Connecting);

        let tries = self.config.connection_tries.max(1);
        let delay = self.config.connection_delay;

        for attempt in 1..=tries {
            match TcpStream::connect((self.config.host.as_str(), self.config.port)).await {
                Ok(stream) => return Some(stream),
                Err(e) if attempt < tries => {
                    warn!(
                        "{}/{}. Connection failed: {}. Waiting {}s.",
                        attempt,
                        tries,
                        e,
                        delay.as_secs()
                    );
                    sleep(delay).await;
                }
                Err(e) => error!("{} attempts failed, last error: {}. Exiting.", tries, e),
            }
        }

        None
    }

    /// Identify the solution, then read-execute-report until a stop condition
    async fn exchange<Rd, Wr>(&mut self, framed: &mut FramedStream<Rd, Wr>) -> Result<FinishReason>
    where
        Rd: AsyncRead + Unpin,
        Wr: AsyncWrite + Unpin,
    {
        framed.send_text(&self.config.solution_id).await?;

        for _ in 0..self.tests.len() {
            self.transition(SessionState::AwaitingTest);
            let Some(frame) = framed.read_frame().await? else {
                info!("Task container closed the connection");
                return Ok(FinishReason::StreamClosed);
            };
            let Some(descriptor) = parse_descriptor(&frame, self.config.truncate_to) else {
                return Ok(FinishReason::MalformedTest);
            };

            self.transition(SessionState::Executing);
            let report = self.run_test(&descriptor).await?;

            self.transition(SessionState::Reporting);
            framed.send_record(&report).await?;
            self.tests_run += 1;

            if report.returncode != 0 {
                warn!("Returncode is {}", report.returncode);
                return Ok(FinishReason::NonZeroReturnCode(report.returncode));
            }
        }

        Ok(FinishReason::TestsExhausted)
    }

    async fn run_test(&self, descriptor: &Value) -> Result<TestReport> {
        let request = TestRequest::from_descriptor(descriptor)?;
        info!("Running test \"{}\"", request.test_name);

        let Some(input_lines) = self.tests.get(&request.test_name) else {
            error!("No test with name \"{}\"", request.test_name);
            return Err(SessionError::UnknownTestName(request.test_name).into());
        };
        debug!("Input lines: {:?}", input_lines);

        let limits = RunLimits::from(&request.constraints);
        let outcome = self
            .runner
            .run(&self.config.command, input_lines, &limits)
            .await?;

        Ok(TestReport::build(
            &request.test_name,
            &outcome,
            children_swap_mb(),
        ))
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Session state: {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn summary(&self, reason: FinishReason) -> SessionSummary {
        SessionSummary {
            tests_run: self.tests_run,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandSpec, ProcessRunner};
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn config(port: u16, script: &str) -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port,
            solution_id: "sol-1".to_string(),
            command: CommandSpec::new("sh").with_args(["-c", script]),
            connection_tries: 2,
            connection_delay: Duration::ZERO,
            truncate_to: 100,
            tests_root: PathBuf::from("/nonexistent"),
        }
    }

    fn suite(tests: &[(&str, &[&str])]) -> TestSuite {
        tests
            .iter()
            .map(|(name, lines)| {
                (
                    name.to_string(),
                    lines.iter().map(|l| l.to_string()).collect(),
                )
            })
            .collect()
    }

    /// Fake coordinator: sends each message after the previous reply and
    /// returns every line it received, starting with the solution id.
    async fn coordinator(messages: Vec<String>) -> (u16, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();

            let mut received = Vec::new();
            match lines.next_line().await.unwrap() {
                Some(line) => received.push(line),
                None => return received,
            }
            for message in messages {
                if write.write_all(format!("{}\n", message).as_bytes()).await.is_err() {
                    break;
                }
                match lines.next_line().await {
                    Ok(Some(line)) => received.push(line),
                    _ => break,
                }
            }
            received
        });

        (port, handle)
    }

    fn report(line: &str) -> TestReport {
        serde_json::from_str(line).unwrap()
    }

    #[tokio::test]
    async fn test_sum_scenario() {
        let (port, coordinator) = coordinator(vec![
            r#"{"test_name":"t1","constraints":{"execution_time_s":2}}"#.to_string(),
        ])
        .await;

        let mut tester = SolutionTester::new(
            config(port, "read a; read b; echo $((a + b))"),
            suite(&[("t1", &["3", "4"])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();
        let received = coordinator.await.unwrap();

        assert_eq!(summary.reason, FinishReason::TestsExhausted);
        assert_eq!(summary.tests_run, 1);
        assert_eq!(tester.state(), SessionState::Finished);
        assert_eq!(received[0], "sol-1");

        let result = report(&received[1]);
        assert_eq!(result.test_name, "t1");
        assert_eq!(result.returncode, 0);
        assert_eq!(result.output, "7");
        assert!(result.peak_ram_used_mb >= 0.0);
        assert!(result.execution_time_s < 2.0);
    }

    #[tokio::test]
    async fn test_stops_after_nonzero_return_code() {
        let (port, coordinator) = coordinator(vec![
            r#"{"test_name":"t1","constraints":{}}"#.to_string(),
            r#"{"test_name":"t2","constraints":{}}"#.to_string(),
            r#"{"test_name":"t3","constraints":{}}"#.to_string(),
        ])
        .await;

        let mut tester = SolutionTester::new(
            config(port, "read x; exit $x"),
            suite(&[("t1", &["0"]), ("t2", &["5"]), ("t3", &["0"])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();
        let received = coordinator.await.unwrap();

        assert_eq!(summary.reason, FinishReason::NonZeroReturnCode(5));
        assert_eq!(summary.tests_run, 2);
        assert_eq!(received.len(), 3);
        assert_eq!(report(&received[2]).test_name, "t2");
        assert_eq!(report(&received[2]).returncode, 5);
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let (port, coordinator) = coordinator(vec![
            r#"{"test_name":"t1","constraints":{"execution_time_s":1}}"#.to_string(),
        ])
        .await;

        let mut tester = SolutionTester::new(
            config(port, "sleep 10"),
            suite(&[("t1", &[])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();
        let received = coordinator.await.unwrap();

        assert_eq!(summary.reason, FinishReason::NonZeroReturnCode(124));
        let result = report(&received[1]);
        assert_eq!(result.returncode, 124);
        assert_eq!(result.output, "TL");
        assert_eq!(result.error, "Timeout (1s)");
    }

    #[tokio::test]
    async fn test_unknown_test_name_is_fatal() {
        let (port, coordinator) = coordinator(vec![
            r#"{"test_name":"missing","constraints":{}}"#.to_string(),
        ])
        .await;

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let err = tester.test_solution().await.unwrap_err();
        let received = coordinator.await.unwrap();

        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::UnknownTestName("missing".to_string()))
        );
        assert_eq!(received, vec!["sol-1".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_constraints_are_fatal() {
        let (port, coordinator) = coordinator(vec![
            r#"{"test_name":"t1","constraints":{"execution_time_s":"2","peak_ram_used_mb":1.5}}"#
                .to_string(),
        ])
        .await;

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let err = tester.test_solution().await.unwrap_err();
        coordinator.await.unwrap();

        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::InvalidConstraintType {
                keys: vec![
                    "peak_ram_used_mb".to_string(),
                    "execution_time_s".to_string()
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_missing_constraints_are_fatal() {
        let (port, coordinator) =
            coordinator(vec![r#"{"test_name":"t1"}"#.to_string()]).await;

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let err = tester.test_solution().await.unwrap_err();
        coordinator.await.unwrap();

        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::MissingConstraintsBlock)
        );
    }

    #[tokio::test]
    async fn test_malformed_message_ends_session() {
        let (port, coordinator) = coordinator(vec!["not json".to_string()]).await;

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();
        let received = coordinator.await.unwrap();

        assert_eq!(summary.reason, FinishReason::MalformedTest);
        assert_eq!(summary.tests_run, 0);
        assert_eq!(received, vec!["sol-1".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_message_ends_session() {
        let (port, coordinator) = coordinator(vec!["{}".to_string()]).await;

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();
        coordinator.await.unwrap();

        assert_eq!(summary.reason, FinishReason::MalformedTest);
    }

    #[tokio::test]
    async fn test_non_object_descriptor_is_fatal() {
        let (port, coordinator) = coordinator(vec![r#"["t1"]"#.to_string()]).await;

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let err = tester.test_solution().await.unwrap_err();
        let received = coordinator.await.unwrap();

        assert_eq!(
            err.downcast_ref::<SessionError>(),
            Some(&SessionError::MissingConstraintsBlock)
        );
        assert_eq!(received, vec!["sol-1".to_string()]);
    }

    #[tokio::test]
    async fn test_negative_constraints_are_run() {
        let (port, coordinator) = coordinator(vec![
            r#"{"test_name":"t1","constraints":{"cpu_execution_time_s":-1}}"#.to_string(),
        ])
        .await;

        let mut tester = SolutionTester::new(
            config(port, "sleep 10"),
            suite(&[("t1", &[])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();
        let received = coordinator.await.unwrap();

        assert_eq!(summary.reason, FinishReason::NonZeroReturnCode(-9));
        assert_eq!(report(&received[1]).returncode, -9);
    }

    #[tokio::test]
    async fn test_stream_closed_before_first_test() {
        let (port, coordinator) = coordinator(Vec::new()).await;

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();
        coordinator.await.unwrap();

        assert_eq!(summary.reason, FinishReason::StreamClosed);
        assert_eq!(summary.tests_run, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_is_normal_termination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut tester = SolutionTester::new(
            config(port, "exit 0"),
            suite(&[("t1", &["1"])]),
            ProcessRunner::default(),
        );
        let summary = tester.test_solution().await.unwrap();

        assert_eq!(
            summary,
            SessionSummary {
                tests_run: 0,
                reason: FinishReason::ConnectFailed
            }
        );
        assert_eq!(tester.state(), SessionState::Finished);
    }
}
