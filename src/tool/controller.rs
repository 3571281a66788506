use super::TestGenerationTool;
use crate::model::TestSuite;
use crate::protocol::{
    BenchmarkRequest, ClientConnection, GenerationRequest, GenerationResult, ProtocolError,
};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex as TokioMutex};

/// Drives one tool through the request loop of a session.
///
/// Tools are untrusted: `run` executes on its own thread and is abandoned at
/// twice the requested time limit, and whatever the tool reports afterwards
/// is sent back as a successful result.
pub struct ToolController<T, S> {
    connection: ClientConnection<S>,
    tool: Arc<TokioMutex<T>>,
}

impl<T, S> ToolController<T, S>
where
    T: TestGenerationTool + 'static,
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(connection: ClientConnection<S>, tool: T) -> Self {
        Self {
            connection,
            tool: Arc::new(TokioMutex::new(tool)),
        }
    }

    /// Serve requests until `StopRequest` or a connection failure.
    ///
    /// Returns the number of benchmark requests answered. Only a failed `Init`
    /// is reported as an error; later connection failures end the loop.
    pub async fn run(mut self) -> Result<usize, ProtocolError> {
        let name = self.tool.lock().await.name().to_string();
        self.connection.init(&name).await?;
        tracing::info!("Tool {} registered with runner", name);

        let mut handled = 0;
        loop {
            let request = match self.connection.receive().await {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!("Failed to receive a request from the runner: {}", e);
                    break;
                }
            };

            match request {
                GenerationRequest::StopRequest => {
                    tracing::info!("Stopping tool {}", name);
                    break;
                }
                GenerationRequest::BenchmarkRequest(request) => {
                    let result = self.handle(request).await;
                    if let Err(e) = self.connection.send(&result).await {
                        tracing::error!("Failed to send a result to the runner: {}", e);
                        break;
                    }
                    handled += 1;
                }
            }
        }
        Ok(handled)
    }

    async fn handle(&mut self, request: BenchmarkRequest) -> GenerationResult {
        let benchmark = &request.benchmark;
        tracing::info!(
            "Generating tests for {} ({}), time limit {} s",
            benchmark.klass,
            benchmark.build_id,
            request.time_limit.as_secs()
        );

        if let Err(e) = self
            .tool
            .lock()
            .await
            .init(&benchmark.root, &benchmark.class_path)
            .await
        {
            tracing::warn!("Tool init failed for {}: {:#}", benchmark.build_id, e);
        }

        let hard_limit = request.time_limit * 2;
        let start = Instant::now();

        // Blocking tools must not stall the runtime driving the hard limit
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let tool = Arc::clone(&self.tool);
        let target = benchmark.klass.clone();
        let time_limit = request.time_limit;
        let output_directory = request.output_directory.clone();
        let runtime = tokio::runtime::Handle::current();
        let run = tokio::task::spawn_blocking(move || {
            runtime.block_on(async move {
                let mut tool = tool.lock().await;
                tokio::select! {
                    result = tool.run(&target, time_limit, &output_directory) => result,
                    _ = cancel_rx => Err(anyhow::anyhow!("run cancelled")),
                }
            })
        });

        match tokio::time::timeout(hard_limit, run).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::warn!("Tool run failed for {}: {:#}", benchmark.build_id, e),
            Ok(Err(e)) => tracing::error!("Tool run panicked on {}: {}", benchmark.build_id, e),
            Err(_) => {
                tracing::warn!(
                    "Tool exceeded hard limit of {} s on {}, cancelled",
                    hard_limit.as_secs(),
                    benchmark.build_id
                );
                let _ = cancel_tx.send(());
            }
        }
        let generation_time = start.elapsed();

        let test_suite = self.report(&request).await;
        tracing::info!(
            "{}: {} tests reported after {} ms",
            benchmark.build_id,
            test_suite.tests.len(),
            generation_time.as_millis()
        );

        GenerationResult::Successful {
            test_suite,
            generation_time,
        }
    }

    /// Ask the tool for its suite once `run` has let go of it.
    ///
    /// A run stuck in blocking code keeps the tool for good; after half the
    /// time limit again an empty suite is reported in its place.
    async fn report(&self, request: &BenchmarkRequest) -> TestSuite {
        let release = request.time_limit / 2;
        match tokio::time::timeout(release, self.tool.lock()).await {
            Ok(mut tool) => tool.report().await,
            Err(_) => {
                tracing::error!(
                    "Tool still busy with {} after cancellation, reporting an empty suite",
                    request.benchmark.build_id
                );
                TestSuite::empty(request.output_directory.join("tests"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Benchmark, TestSuite};
    use crate::protocol::ServerConnection;
    use anyhow::Result;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::duplex;

    #[derive(Default)]
    struct Calls {
        init: AtomicUsize,
        run: AtomicUsize,
        report: AtomicUsize,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Finish,
        /// `run` never completes but yields to the runtime
        Hang,
        /// `run` blocks its thread well past the hard limit
        Block,
    }

    /// Records calls and runs according to its behavior.
    struct RecordingTool {
        calls: Arc<Calls>,
        behavior: Behavior,
    }

    impl TestGenerationTool for RecordingTool {
        fn name(&self) -> &str {
            "recording"
        }

        async fn init(&mut self, _root: &Path, _class_path: &[PathBuf]) -> Result<()> {
            self.calls.init.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&mut self, _target: &str, _time_limit: Duration, _output: &Path) -> Result<()> {
            self.calls.run.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Finish => {}
                Behavior::Hang => std::future::pending::<()>().await,
                Behavior::Block => std::thread::sleep(Duration::from_secs(2)),
            }
            Ok(())
        }

        async fn report(&mut self) -> TestSuite {
            self.calls.report.fetch_add(1, Ordering::SeqCst);
            TestSuite {
                tests: vec!["a.BTest".to_string()],
                ..TestSuite::empty("/out/tests")
            }
        }
    }

    fn request(time_limit: Duration) -> BenchmarkRequest {
        BenchmarkRequest {
            benchmark: Benchmark {
                name: "b".to_string(),
                root: PathBuf::from("/bench/b"),
                build_id: "b-1".to_string(),
                src: PathBuf::from("/bench/b/src"),
                bin: PathBuf::from("/bench/b/bin"),
                class_path: vec![],
                klass: "a.B".to_string(),
            },
            time_limit,
            output_directory: PathBuf::from("/out"),
        }
    }

    type Session = (
        ServerConnection<tokio::io::DuplexStream>,
        Arc<Calls>,
        tokio::task::JoinHandle<Result<usize, ProtocolError>>,
    );

    fn start(behavior: Behavior) -> Session {
        let (server, client) = duplex(64 * 1024);
        let calls = Arc::new(Calls::default());
        let tool = RecordingTool {
            calls: calls.clone(),
            behavior,
        };
        let controller = ToolController::new(ClientConnection::new(client), tool);
        let handle = tokio::spawn(controller.run());
        (ServerConnection::new(server), calls, handle)
    }

    #[tokio::test]
    async fn test_answers_each_request_then_stops() {
        let (mut server, calls, handle) = start(Behavior::Finish);
        assert_eq!(server.init().await.unwrap(), "recording");

        for _ in 0..2 {
            let result = server.request(request(Duration::from_secs(5))).await.unwrap();
            match result {
                GenerationResult::Successful { test_suite, .. } => {
                    assert_eq!(test_suite.tests, vec!["a.BTest"]);
                }
                other => panic!("unexpected result: {:?}", other),
            }
        }
        server.stop().await.unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), 2);
        assert_eq!(calls.init.load(Ordering::SeqCst), 2);
        assert_eq!(calls.run.load(Ordering::SeqCst), 2);
        assert_eq!(calls.report.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_hanging_tool_is_cut_off_at_twice_the_limit() {
        let (mut server, calls, handle) = start(Behavior::Hang);
        server.init().await.unwrap();

        let soft_limit = Duration::from_millis(150);
        let started = Instant::now();
        let result = server.request(request(soft_limit)).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= soft_limit * 2);
        assert!(elapsed < Duration::from_secs(5));
        match result {
            GenerationResult::Successful {
                generation_time, ..
            } => assert!(generation_time >= soft_limit * 2),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.report.load(Ordering::SeqCst), 1);

        server.stop().await.unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_blocking_tool_is_abandoned_at_twice_the_limit() {
        let (mut server, calls, handle) = start(Behavior::Block);
        server.init().await.unwrap();

        let soft_limit = Duration::from_millis(100);
        let started = Instant::now();
        let result = server.request(request(soft_limit)).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= soft_limit * 2);
        assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);
        match result {
            GenerationResult::Successful { test_suite, .. } => {
                assert!(test_suite.tests.is_empty());
                assert_eq!(test_suite.test_src_path, PathBuf::from("/out/tests"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.run.load(Ordering::SeqCst), 1);
        assert_eq!(calls.report.load(Ordering::SeqCst), 0);

        server.stop().await.unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lost_connection_ends_loop() {
        let (mut server, calls, handle) = start(Behavior::Finish);
        server.init().await.unwrap();
        drop(server);

        assert_eq!(handle.await.unwrap().unwrap(), 0);
        assert_eq!(calls.init.load(Ordering::SeqCst), 0);
    }
}
