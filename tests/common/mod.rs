//! Shared harness for integration tests: a full service cluster (one
//! orchestrator, three workers) over a single in-memory backend.
#![allow(dead_code)]

use std::sync::Arc;

use overture::backend::{KvBackend, MemoryBackend, StreamMessage};
use overture::config::Settings;
use overture::event::EventEnvelope;
use overture::orchestrator::Orchestrator;
use overture::runtime::{ProcessOutcome, StreamProcessor};
use overture::schema::SchemaRegistry;
use overture::worker::{
    worker_group, AnalysisProcessor, ReportProcessor, RequirementsProcessor, WorkProcessor, Worker,
};

pub fn base_settings() -> Settings {
    Settings {
        block_ms: 0,
        idle_reclaim_ms: 0,
        max_attempts: 3,
        ..Settings::default()
    }
}

pub struct Cluster {
    pub backend: Arc<MemoryBackend>,
    pub registry: Arc<SchemaRegistry>,
    pub orchestrator: StreamProcessor<Orchestrator>,
    workers: Vec<StreamProcessor<Worker<Box<dyn WorkProcessor>>>>,
    ledger_dir: tempfile::TempDir,
}

impl Cluster {
    pub async fn start() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let registry = Arc::new(SchemaRegistry::load("schemas").expect("bundled schemas"));
        let ledger_dir = tempfile::tempdir().expect("ledger dir");

        let orchestrator_settings = Settings {
            consumer_group: "orchestrator".to_string(),
            consumer_name: "orchestrator-1".to_string(),
            ..base_settings()
        };
        let orchestrator = StreamProcessor::new(
            backend.clone(),
            registry.clone(),
            orchestrator_settings.clone(),
            Orchestrator::new(backend.clone(), orchestrator_settings),
        )
        .await
        .expect("orchestrator processor");

        let ledger = ledger_dir.path().to_str().expect("utf8 path").to_string();
        let mut workers = Vec::new();
        let agents: Vec<(&str, Box<dyn WorkProcessor>)> = vec![
            (
                "requirements_manager",
                Box::new(RequirementsProcessor::new("requirements_manager")),
            ),
            (
                "dev_worker",
                Box::new(AnalysisProcessor::new("dev_worker", false, &ledger)),
            ),
            ("test_worker", Box::new(ReportProcessor::new("test_worker"))),
        ];
        for (agent, processor) in agents {
            let settings = Settings {
                consumer_group: worker_group(agent),
                consumer_name: format!("{agent}-1"),
                ..base_settings()
            };
            let worker = Worker::new(
                backend.clone(),
                registry.clone(),
                settings.clone(),
                agent,
                processor,
            );
            workers.push(
                StreamProcessor::new(backend.clone(), registry.clone(), settings, worker)
                    .await
                    .expect("worker processor"),
            );
        }

        Self {
            backend,
            registry,
            orchestrator,
            workers,
            ledger_dir,
        }
    }

    pub fn orchestrator_handler(&self) -> &Orchestrator {
        self.orchestrator.handler()
    }

    pub fn ledger_path(&self) -> &std::path::Path {
        self.ledger_dir.path()
    }

    /// Publish an envelope onto the work stream.
    pub async fn publish(&self, envelope: &EventEnvelope) -> String {
        self.backend
            .stream_append(
                "audit:events",
                &[("event", &envelope.to_json().expect("encode"))],
            )
            .await
            .expect("publish")
    }

    /// Drive every consumer until a full round produces no messages.
    pub async fn pump(&self) -> Vec<ProcessOutcome> {
        let mut all = Vec::new();
        loop {
            let mut busy = false;
            let outcomes = self.orchestrator.consume_once().await.expect("orchestrator");
            busy |= !outcomes.is_empty();
            all.extend(outcomes);
            for worker in &self.workers {
                let outcomes = worker.consume_once().await.expect("worker");
                busy |= !outcomes.is_empty();
                all.extend(outcomes);
            }
            if !busy {
                return all;
            }
        }
    }

    /// Every event currently on the work stream, decoded.
    pub async fn events(&self) -> Vec<EventEnvelope> {
        self.raw_entries()
            .await
            .iter()
            .filter_map(|m| m.field("event"))
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    pub async fn raw_entries(&self) -> Vec<StreamMessage> {
        self.backend
            .stream_range("audit:events", 10_000)
            .await
            .expect("stream range")
    }

    pub async fn event_types(&self) -> Vec<String> {
        self.events().await.into_iter().map(|e| e.event_type).collect()
    }
}
