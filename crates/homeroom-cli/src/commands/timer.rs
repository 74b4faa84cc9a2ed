use chrono::{DateTime, Duration, Utc};
use clap::Subcommand;
use homeroom_core::{Phase, TimerEngine};

use super::{catch_up, open_session, print_json, CliResult};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Start or resume the countdown
    Start,
    /// Pause the countdown
    Pause,
    /// Restore the current phase to its full duration, idle
    Reset,
    /// End the current phase early
    Skip {
        /// Phase to move to (work or break); defaults to the next phase
        #[arg(long)]
        to: Option<Phase>,
    },
    /// Print the current session as JSON
    Status,
}

pub fn run(action: TimerAction, learner: Option<&str>) -> CliResult {
    let session = open_session(learner)?;
    let Some(store) = session.hub.store() else {
        return Err("timer commands need sync.durable_store = true; use `watch` instead".into());
    };
    let now = Utc::now();

    if let TimerAction::Status = action {
        let engine = match store.fetch(&session.learner)? {
            Some(record) => project(TimerEngine::from_state(record.state), now),
            None => TimerEngine::new(session.config.settings(), now),
        };
        return print_json(&engine.snapshot(now));
    }

    let mut ctx = session.hub.attach(&session.learner, now);
    let mut events = ctx.claim(now);
    events.extend(catch_up(&mut ctx, now));
    events.extend(match action {
        TimerAction::Start => ctx.start(now),
        TimerAction::Pause => ctx.pause(now),
        TimerAction::Reset => ctx.reset(now),
        TimerAction::Skip { to } => {
            let to = to.unwrap_or_else(|| ctx.state().phase.next());
            ctx.skip(to, now)
        }
        TimerAction::Status => Vec::new(),
    });
    events.push(ctx.snapshot(now));
    ctx.detach(now);

    for event in &events {
        print_json(event)?;
    }
    Ok(())
}

fn project(mut engine: TimerEngine, now: DateTime<Utc>) -> TimerEngine {
    while engine.is_running() {
        let next = engine.state().updated_at + Duration::seconds(1);
        if next > now {
            break;
        }
        engine.tick(next);
    }
    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use homeroom_core::Settings;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn running(now: DateTime<Utc>) -> TimerEngine {
        let mut engine = TimerEngine::new(Settings::default(), now);
        engine.start(now);
        engine
    }

    #[test]
    fn projection_counts_elapsed_seconds() {
        let engine = project(running(t0()), t0() + Duration::seconds(90));
        assert_eq!(engine.remaining_secs(), 25 * 60 - 90);
        assert!(engine.is_running());
    }

    #[test]
    fn projection_stops_at_phase_end() {
        let engine = project(running(t0()), t0() + Duration::hours(3));
        assert_eq!(engine.phase(), Phase::Break);
        assert!(!engine.is_running());
        assert_eq!(engine.cycles_completed(), 1);
    }

    #[test]
    fn idle_session_is_not_projected() {
        let engine = TimerEngine::new(Settings::default(), t0());
        let projected = project(engine.clone(), t0() + Duration::minutes(5));
        assert_eq!(projected.state(), engine.state());
    }
}
