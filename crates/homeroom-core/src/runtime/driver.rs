//! Async driver: runs one context on the tokio runtime against the wall clock.

use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::context::TimerContext;
use crate::events::Event;
use crate::timer::{Phase, Settings};

/// User intent delivered to a running context.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Pause,
    Reset,
    Skip(Phase),
    /// Skip to whichever phase follows the current one.
    SkipNext,
    UpdateSettings(Settings),
    /// Leave gracefully and stop the driver.
    Detach,
}

/// Drive `ctx` until a `Detach` command arrives or the command sender is
/// dropped.
///
/// Once per second the context is polled and ticked and a state snapshot is
/// reported after the step's own events. Inbound messages are handled as soon
/// as they arrive.
pub async fn run_context<F>(mut ctx: TimerContext, mut commands: mpsc::Receiver<Command>, mut on_event: F)
where
    F: FnMut(&Event),
{
    let mut ticker = tokio::time::interval(StdDuration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut inbound_open = true;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                for event in ctx.step(now) {
                    on_event(&event);
                }
                on_event(&ctx.snapshot(now));
            }
            inbound = ctx.next_inbound(), if inbound_open => {
                match inbound {
                    Some(inbound) => {
                        for event in ctx.handle_inbound(inbound, Utc::now()) {
                            on_event(&event);
                        }
                    }
                    None => inbound_open = false,
                }
            }
            command = commands.recv() => {
                let now = Utc::now();
                let events = match command {
                    Some(Command::Start) => ctx.start(now),
                    Some(Command::Pause) => ctx.pause(now),
                    Some(Command::Reset) => ctx.reset(now),
                    Some(Command::Skip(to)) => ctx.skip(to, now),
                    Some(Command::SkipNext) => {
                        let to = ctx.state().phase.next();
                        ctx.skip(to, now)
                    }
                    Some(Command::UpdateSettings(settings)) => match ctx.update_settings(settings, now) {
                        Ok(events) => events,
                        Err(e) => {
                            tracing::warn!(error = %e, "settings rejected");
                            Vec::new()
                        }
                    },
                    Some(Command::Detach) | None => break,
                };
                for event in events {
                    on_event(&event);
                }
            }
        }
    }

    ctx.detach(Utc::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::SessionHub;
    use crate::storage::SyncConfig;
    use crate::sync::LearnerId;

    #[tokio::test]
    async fn commands_run_until_detach() {
        let hub = SessionHub::new(SyncConfig::default(), Settings::default());
        let ctx = hub.attach(&LearnerId::new("ada").unwrap(), Utc::now());
        let (tx, rx) = mpsc::channel(8);
        tx.send(Command::Start).await.unwrap();
        tx.send(Command::Pause).await.unwrap();
        tx.send(Command::Detach).await.unwrap();

        let mut events = Vec::new();
        run_context(ctx, rx, |e| events.push(e.clone())).await;

        assert!(events.iter().any(|e| matches!(e, Event::LeaderElected { .. })));
        assert!(events.iter().any(|e| matches!(e, Event::TimerStarted { .. })));
        assert!(events.iter().any(|e| matches!(e, Event::TimerPaused { .. })));
    }

    #[tokio::test]
    async fn invalid_settings_do_not_stop_the_driver() {
        let hub = SessionHub::new(SyncConfig::default(), Settings::default());
        let ctx = hub.attach(&LearnerId::new("ada").unwrap(), Utc::now());
        let (tx, rx) = mpsc::channel(8);
        let bad = Settings {
            work_minutes: 0,
            ..Settings::default()
        };
        tx.send(Command::UpdateSettings(bad)).await.unwrap();
        tx.send(Command::Start).await.unwrap();
        drop(tx);

        let mut events = Vec::new();
        run_context(ctx, rx, |e| events.push(e.clone())).await;
        assert!(events.iter().any(|e| matches!(e, Event::TimerStarted { .. })));
        assert!(!events.iter().any(|e| matches!(e, Event::SettingsApplied { .. })));
    }
}
