//! Subcommand implementations

use anyhow::{Context, Result};
use dochub_chat::ChatHub;
use dochub_core::{
    Author, CannedAnalysis, CannedResponder, EventBus, EventKind, HubConfig, HubEvent,
    IdGenerator, Message, SystemClock, TokioScheduler,
};
use dochub_pipeline::DocumentPipeline;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const SAMPLE_DOCUMENTS: [(&str, &str); 5] = [
    ("Q3 Financial Report.pdf", "application/pdf"),
    ("Contract Amendment.docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("Meeting Notes.txt", "text/plain"),
    ("Budget Forecast.xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("Site Photo.jpg", "image/jpeg"),
];

const SAMPLE_MESSAGES: [(&str, &str); 4] = [
    ("sarah", "Can you summarize the Q3 report?"),
    ("mike", "Also flag anything urgent in the contract amendment."),
    ("sarah", "Thanks! What are the next steps?"),
    ("mike", "Let's review the budget forecast tomorrow."),
];

/// Shared wiring for every subcommand
pub(crate) struct Env {
    config: HubConfig,
    bus: EventBus,
    ids: Arc<IdGenerator>,
    latency: Duration,
}

impl Env {
    pub(crate) fn new(config: HubConfig, latency: Duration) -> Self {
        let bus = EventBus::from_config(&config.bus);
        Self {
            config,
            bus,
            ids: Arc::new(IdGenerator::new()),
            latency,
        }
    }

    fn pipeline(&self) -> DocumentPipeline {
        DocumentPipeline::builder(Arc::new(CannedAnalysis::new(self.latency)), self.bus.clone())
            .config(self.config.pipeline.clone())
            .id_generator(Arc::clone(&self.ids))
            .build()
    }

    fn chat_hub(&self) -> ChatHub {
        ChatHub::with_parts(
            Arc::new(CannedResponder::new(self.latency)),
            self.bus.clone(),
            self.config.chat.clone(),
            Arc::new(SystemClock),
            Arc::new(TokioScheduler),
            Arc::clone(&self.ids),
        )
    }
}

pub(crate) async fn demo(env: &Env, documents: usize, messages: usize) -> Result<()> {
    let (observer, printer) = env.bus.observe(EventKind::ALL, |event| {
        println!("{}", render_event(&event));
    });

    let pipeline = env.pipeline();
    let hub = env.chat_hub();
    let session = hub.create_session("Team Chat")?;
    session.join("sarah", "Sarah Chen")?;
    session.join("mike", "Mike Johnson")?;

    let mut ids = Vec::with_capacity(documents);
    for (name, content_type) in SAMPLE_DOCUMENTS.iter().cycle().take(documents) {
        let content = format!("sample content of {name}").into_bytes();
        ids.push(pipeline.ingest_upload(*name, Some(*content_type), content)?);
    }
    for (author, text) in SAMPLE_MESSAGES.iter().cycle().take(messages) {
        session.post_message(*author, *text)?;
    }

    for id in ids {
        pipeline.settled(id).await?;
    }
    session.idle().await;

    env.bus.unsubscribe(observer);
    printer.await.context("event printer stopped unexpectedly")?;

    println!();
    println!("Documents");
    println!("=========");
    for document in pipeline.list() {
        println!(
            "  {:<28} {:<12} {:<10} {}",
            document.name(),
            document.media_kind(),
            document.status(),
            document.insights().map_or("-", |i| i.summary.as_str())
        );
    }

    println!();
    println!("Stats: {}", serde_json::to_string(&pipeline.stats())?);
    println!("Bus:   {:?}", env.bus.stats());

    println!();
    println!("{}", session.title());
    println!("{}", "=".repeat(session.title().len()));
    print_transcript(&session.history());
    Ok(())
}

pub(crate) async fn ingest(env: &Env, file: &Path, content_type: Option<&str>) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("path has no file name")?;

    let pipeline = env.pipeline();
    let id = pipeline.ingest_upload(name, content_type, content)?;
    let document = pipeline.settled(id).await?;

    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

pub(crate) async fn chat(env: &Env, messages: &[String]) -> Result<()> {
    let session = env.chat_hub().create_session("Command Line")?;
    for text in messages {
        session.post_message("you", text.as_str())?;
    }
    session.idle().await;

    print_transcript(&session.history());
    Ok(())
}

fn print_transcript(history: &[Message]) {
    for message in history {
        println!("{}", render_message(message));
    }
}

fn render_message(message: &Message) -> String {
    let who = match &message.author {
        Author::Human(id) => id.as_str(),
        Author::Assistant => "assistant",
    };
    format!(
        "[{}] {who}: {}",
        message.sent_at.format("%H:%M:%S%.3f"),
        message.content
    )
}

fn render_event(event: &HubEvent) -> String {
    match event {
        HubEvent::DocumentCreated { document } => {
            format!("document  {} created ({})", document.name(), document.media_kind())
        }
        HubEvent::DocumentStatusChanged { document, previous } => match document.failure_reason() {
            Some(reason) => format!(
                "document  {} {previous} -> {} ({reason})",
                document.name(),
                document.status()
            ),
            None => format!("document  {} {previous} -> {}", document.name(), document.status()),
        },
        HubEvent::MessageAppended { message, .. } => format!("message   {}", render_message(message)),
        HubEvent::AssistantReplyFailed { turn, reason, .. } => {
            format!("assistant {turn} failed: {reason}")
        }
        HubEvent::PresenceChanged { participant, .. } => format!(
            "presence  {} is {}",
            participant.display_name, participant.presence
        ),
    }
}
