use std::sync::Arc;

use hyper::Method;

use super::state::{DeliveryOutcome, Probing, Received, Settled};
use crate::http_probe::prelude::*;
use crate::http_probe::report;
use crate::metrics;
use crate::queue::{Delivery, Publish};

/// What happens to the record of a successful probe.
#[derive(Clone)]
pub enum DeliveryPolicy {
    /// Write the record to the log and acknowledge.
    Log,
    /// Publish the record; requeue the task if that fails.
    Forward {
        publisher: Arc<dyn Publish>,
        routing_key: String,
    },
}

impl DeliveryPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            DeliveryPolicy::Log => "log",
            DeliveryPolicy::Forward { .. } => "forward",
        }
    }
}

/// Takes one delivery from arrival to settlement.
pub struct DeliveryController {
    prober: Arc<dyn Prober>,
    policy: DeliveryPolicy,
    method: Method,
}

impl DeliveryController {
    pub fn new(prober: Arc<dyn Prober>, policy: DeliveryPolicy, method: Method) -> Self {
        Self {
            prober,
            policy,
            method,
        }
    }

    /// Probe the delivered task and settle the delivery exactly once.
    pub async fn handle(&self, delivery: Delivery) -> DeliveryOutcome {
        if delivery.is_redelivery() {
            log::debug!("Redelivered task: {delivery:?}");
        }

        let probing = Received::new(delivery).start_probe(self.method.clone());
        let probed = self.prober.probe(probing.task()).await;
        let settled = match probed {
            Ok(result) => self.emit(probing, &result).await,
            Err(error) => {
                log::warn!(
                    "[{}] Probe failed in {} phase: {}",
                    error.target,
                    error.phase,
                    report(&error)
                );
                if log::log_enabled!(log::Level::Debug) {
                    match error.trace_json() {
                        Ok(trace) => log::debug!("[{}] Partial trace: {trace}", error.target),
                        Err(e) => log::debug!("[{}] Partial trace unavailable: {e}", error.target),
                    }
                }
                probing.probe_failed()
            }
        };

        let outcome = settled.outcome();
        if let Err(e) = settled.commit().await {
            log::error!("Failed to settle delivery as {outcome}: {}", report(&e));
        }
        outcome
    }

    async fn emit(&self, probing: Probing, result: &ProbeResult) -> Settled {
        let record = metrics::encode_now(result);
        log::debug!(
            "[{}] Status: {}, {}",
            result.target,
            result.status_code,
            result.timings()
        );
        if log::log_enabled!(log::Level::Trace) {
            match result.to_json() {
                Ok(json) => log::trace!("[{}] Result: {json}", result.target),
                Err(e) => log::trace!("[{}] Result unavailable: {e}", result.target),
            }
        }

        match &self.policy {
            DeliveryPolicy::Log => {
                log::info!("{record}");
                probing.logged()
            }
            DeliveryPolicy::Forward {
                publisher,
                routing_key,
            } => match publisher.publish(routing_key, record.to_line().as_bytes()).await {
                Ok(()) => probing.forwarded(),
                Err(e) => {
                    log::warn!(
                        "[{}] Failed to forward record, requeueing task: {}",
                        result.target,
                        report(&e)
                    );
                    probing.forward_failed()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::queue::testing::{RecordingPublisher, delivery};
    use crate::task::ProbeTask;

    /// Answers from a fixed script and remembers every task it saw.
    struct ScriptedProber {
        fail_with: Option<ProbePhase>,
        seen: Mutex<Vec<ProbeTask>>,
    }

    impl ScriptedProber {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                fail_with: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(phase: ProbePhase) -> Arc<Self> {
            Arc::new(Self {
                fail_with: Some(phase),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, task: &ProbeTask) -> Result<ProbeResult, ProbeError> {
            self.seen.lock().expect("lock").push(task.clone());
            match self.fail_with {
                Some(phase) => Err(ProbeError {
                    phase,
                    target: task.target.clone(),
                    url: task.url(),
                    source: "scripted failure".into(),
                    trace: Vec::new(),
                }),
                None => Ok(ProbeResult {
                    target: task.target.clone(),
                    url: task.url(),
                    method: task.method.to_string(),
                    start_time: 1_000,
                    finish_time: 51_000,
                    status_code: 200,
                    content_length: 0,
                    body: Bytes::new(),
                    events: Vec::new(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_successful_probe_is_acknowledged() {
        let prober = ScriptedProber::succeeding();
        let controller = DeliveryController::new(prober.clone(), DeliveryPolicy::Log, Method::HEAD);
        let (delivery, settled) = delivery("example.com");

        assert_eq!(controller.handle(delivery).await, DeliveryOutcome::Acknowledged);
        assert_eq!(settled.await, Ok(DeliveryOutcome::Acknowledged));
        assert_eq!(
            prober.seen.lock().expect("lock").as_slice(),
            &[ProbeTask::new("example.com", Method::HEAD)]
        );
    }

    #[tokio::test]
    async fn test_probe_errors_are_rejected_without_requeue() {
        for phase in [
            ProbePhase::Dns,
            ProbePhase::Connect,
            ProbePhase::Tls,
            ProbePhase::Timeout,
            ProbePhase::Other,
        ] {
            let publisher = Arc::new(RecordingPublisher::default());
            let policy = DeliveryPolicy::Forward {
                publisher: publisher.clone(),
                routing_key: "results".to_string(),
            };
            let controller =
                DeliveryController::new(ScriptedProber::failing(phase), policy, Method::HEAD);
            let (delivery, settled) = delivery("nonexistent.invalid");

            assert_eq!(
                controller.handle(delivery).await,
                DeliveryOutcome::RejectedNoRequeue
            );
            assert_eq!(settled.await, Ok(DeliveryOutcome::RejectedNoRequeue));
            assert!(publisher.sent.lock().expect("lock").is_empty());
        }
    }

    #[tokio::test]
    async fn test_forwarded_record_is_published() {
        let publisher = Arc::new(RecordingPublisher::default());
        let policy = DeliveryPolicy::Forward {
            publisher: publisher.clone(),
            routing_key: "results".to_string(),
        };
        let controller =
            DeliveryController::new(ScriptedProber::succeeding(), policy, Method::GET);
        let (delivery, settled) = delivery("example.com");

        assert_eq!(
            controller.handle(delivery).await,
            DeliveryOutcome::AcknowledgedAndForwarded
        );
        assert_eq!(settled.await, Ok(DeliveryOutcome::AcknowledgedAndForwarded));

        let sent = publisher.sent.lock().expect("lock");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "results");
        let line = String::from_utf8(sent[0].1.clone()).expect("utf8");
        assert!(line.starts_with(
            "http_check,method=GET,server=example.com,status_code=200 \
             content_length=0i,http_response_code=200i,response_time=50000i "
        ));
    }

    #[tokio::test]
    async fn test_publish_failure_requeues() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let policy = DeliveryPolicy::Forward {
            publisher,
            routing_key: "results".to_string(),
        };
        let controller =
            DeliveryController::new(ScriptedProber::succeeding(), policy, Method::GET);
        let (delivery, settled) = delivery("example.com");

        assert_eq!(
            controller.handle(delivery).await,
            DeliveryOutcome::RejectedRequeue
        );
        assert_eq!(settled.await, Ok(DeliveryOutcome::RejectedRequeue));
    }

    #[tokio::test]
    async fn test_redelivered_task_is_probed_again() {
        let prober = ScriptedProber::succeeding();
        let controller = DeliveryController::new(prober.clone(), DeliveryPolicy::Log, Method::GET);

        let (first, first_settled) = delivery("example.com");
        let (second, second_settled) = delivery("example.com");
        assert_eq!(controller.handle(first).await, DeliveryOutcome::Acknowledged);
        assert_eq!(controller.handle(second).await, DeliveryOutcome::Acknowledged);

        assert_eq!(first_settled.await, Ok(DeliveryOutcome::Acknowledged));
        assert_eq!(second_settled.await, Ok(DeliveryOutcome::Acknowledged));
        assert_eq!(prober.seen.lock().expect("lock").len(), 2);
    }

    mod end_to_end {
        use std::net::SocketAddr;

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        use super::*;
        use crate::config::app_config::{setup_resolver, setup_tls_connector};

        fn collector() -> Arc<TraceCollector> {
            let resolver = setup_resolver(&["1.1.1.1".parse().expect("valid ip")]);
            let connector = setup_tls_connector().expect("tls connector");
            Arc::new(TraceCollector::new(resolver, connector))
        }

        async fn serve_ok() -> SocketAddr {
            let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
            let addr = listener.local_addr().expect("local addr");
            tokio::spawn(async move {
                while let Ok((mut socket, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 2048];
                        let _ = socket.read(&mut buf).await;
                        let _ = socket
                            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                            .await;
                        let _ = socket.shutdown().await;
                    });
                }
            });
            addr
        }

        #[tokio::test]
        async fn test_reachable_target_is_acknowledged() {
            let addr = serve_ok().await;
            let controller = DeliveryController::new(collector(), DeliveryPolicy::Log, Method::HEAD);
            let (delivery, settled) = delivery(&format!("http://{addr}"));

            assert_eq!(controller.handle(delivery).await, DeliveryOutcome::Acknowledged);
            assert_eq!(settled.await, Ok(DeliveryOutcome::Acknowledged));
        }

        #[tokio::test]
        async fn test_reachable_target_is_forwarded() {
            let addr = serve_ok().await;
            let publisher = Arc::new(RecordingPublisher::default());
            let policy = DeliveryPolicy::Forward {
                publisher: publisher.clone(),
                routing_key: "results".to_string(),
            };
            let controller = DeliveryController::new(collector(), policy, Method::HEAD);
            let (delivery, _settled) = delivery(&format!("http://{addr}"));

            assert_eq!(
                controller.handle(delivery).await,
                DeliveryOutcome::AcknowledgedAndForwarded
            );
            let sent = publisher.sent.lock().expect("lock");
            let line = String::from_utf8(sent[0].1.clone()).expect("utf8");
            assert!(line.contains("status_code=200 "));
            assert!(!line.contains("response_time=0i"));
        }

        #[tokio::test]
        async fn test_unresolvable_target_emits_no_record() {
            let publisher = Arc::new(RecordingPublisher::default());
            let policy = DeliveryPolicy::Forward {
                publisher: publisher.clone(),
                routing_key: "results".to_string(),
            };
            let controller = DeliveryController::new(collector(), policy, Method::HEAD);
            let (delivery, settled) = delivery("nonexistent.invalid");

            assert_eq!(
                controller.handle(delivery).await,
                DeliveryOutcome::RejectedNoRequeue
            );
            assert_eq!(settled.await, Ok(DeliveryOutcome::RejectedNoRequeue));
            assert!(publisher.sent.lock().expect("lock").is_empty());
        }

        #[tokio::test]
        async fn test_empty_payload_is_rejected() {
            let controller = DeliveryController::new(collector(), DeliveryPolicy::Log, Method::GET);
            let (delivery, settled) = delivery("   ");

            assert_eq!(
                controller.handle(delivery).await,
                DeliveryOutcome::RejectedNoRequeue
            );
            assert_eq!(settled.await, Ok(DeliveryOutcome::RejectedNoRequeue));
        }
    }
}
