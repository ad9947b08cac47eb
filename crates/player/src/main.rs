use std::sync::Arc;
use std::time::Duration;

use karyera_domain::engine::{DetailOutcome, Segment};
use karyera_domain::playback::PlaybackEvent;
use karyera_domain::ports::stories::StoryRepository;
use karyera_domain::session::{DetailResponse, StorySession};
use karyera_domain::util::now_ms;
use karyera_infra::config::{AppConfig, DataBackend};
use karyera_infra::logging::init_tracing;
use karyera_infra::repositories::InMemoryStoryRepository;
use karyera_infra::stories_client::HttpStoryRepository;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EXPIRY_SWEEP: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;

    let engine_config = config.engine_config()?;
    let repository = build_repository(&config)?;
    let mut session = StorySession::new(repository, engine_config);
    session.refresh().await?;

    let index = session.engine().projections().index();
    info!(group_count = index.len(), "story feed loaded");
    let Some(group) = index
        .preferred_author()
        .and_then(|author_id| index.get(author_id))
    else {
        info!("no active stories to play");
        return Ok(());
    };
    let author_id = group.author_id().to_string();
    let start = group.first_unread().unwrap_or(0);

    let (detail_tx, mut detail_rx) = mpsc::unbounded_channel::<DetailResponse>();
    session.open(&author_id, start)?;
    dispatch_detail(&mut session, &detail_tx);
    log_frame(&session);

    let mut ticks = tokio::time::interval(Duration::from_millis(
        engine_config.playback.tick_interval_ms,
    ));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep = tokio::time::interval(EXPIRY_SWEEP);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let Some(token) = session.engine().timer() else {
                    break;
                };
                match session.tick(token).event {
                    PlaybackEvent::Moved { .. } => log_frame(&session),
                    PlaybackEvent::Finishing => info!("last story finished"),
                    PlaybackEvent::Closed => break,
                    _ => {}
                }
            }
            Some(response) = detail_rx.recv() => {
                match session.apply_detail(response)? {
                    DetailOutcome::Applied => debug!("story detail applied"),
                    DetailOutcome::Removed(step) => {
                        if step.event == PlaybackEvent::Closed {
                            break;
                        }
                        log_frame(&session);
                    }
                    DetailOutcome::Failed(err) if !err.is_retryable() => {
                        warn!(error = %err, "skipping story without a readable detail");
                        if session.next().event == PlaybackEvent::Closed {
                            break;
                        }
                        log_frame(&session);
                    }
                    DetailOutcome::Failed(_) | DetailOutcome::Stale => {}
                }
            }
            _ = sweep.tick() => {
                session.refresh_expiry();
                if !session.engine().cursor().is_open() {
                    break;
                }
                if session.retry() {
                    warn!("retrying story detail");
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
        dispatch_detail(&mut session, &detail_tx);
    }

    session.close();
    info!("playback closed");
    Ok(())
}

/// Runs the session's outstanding detail fetch on its own task so ticks and
/// shutdown keep flowing while it is in flight.
fn dispatch_detail(session: &mut StorySession, detail_tx: &mpsc::UnboundedSender<DetailResponse>) {
    let Some(fetch) = session.take_detail_fetch() else {
        return;
    };
    let detail_tx = detail_tx.clone();
    tokio::spawn(async move {
        if detail_tx.send(fetch.await).is_err() {
            debug!("player loop gone, dropping story detail");
        }
    });
}

fn build_repository(config: &AppConfig) -> anyhow::Result<Arc<dyn StoryRepository>> {
    let repository: Arc<dyn StoryRepository> = match config.backend()? {
        DataBackend::Http => {
            if config.token().is_none() {
                warn!("access_token is empty, story api calls will be rejected");
            }
            Arc::new(HttpStoryRepository::from_config(config)?)
        }
        DataBackend::Memory => Arc::new(InMemoryStoryRepository::demo(now_ms())),
    };
    Ok(repository)
}

fn log_frame(session: &StorySession) {
    let Some(frame) = session.frame() else {
        return;
    };
    let position = frame
        .segments
        .iter()
        .position(|segment| !matches!(segment, Segment::Done))
        .unwrap_or(0);
    info!(
        story_id = %frame.story_id,
        author = %frame.author_name,
        title = %frame.title,
        position = position + 1,
        of = frame.segments.len(),
        views = frame.view_count,
        likes = frame.like_count,
        liked = frame.is_liked,
        deletable = frame.can_delete,
        age = %frame.age_label,
        paused = frame.paused,
        "now playing"
    );
}
