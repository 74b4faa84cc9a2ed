use chrono::Utc;
use clap::Subcommand;
use homeroom_core::{CompletionSignal, Settings};

use super::{catch_up, open_session, print_json, CliResult};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the learner's current settings
    Show,
    /// Change one or more settings; omitted values are kept
    Set {
        #[arg(long)]
        work: Option<u32>,
        #[arg(long)]
        short_break: Option<u32>,
        #[arg(long)]
        long_break: Option<u32>,
        /// Work phases before a long break
        #[arg(long)]
        cycles: Option<u32>,
        /// bell, chime, digital, gentle, alarm or silent
        #[arg(long)]
        signal: Option<CompletionSignal>,
        /// 0-100
        #[arg(long)]
        volume: Option<u8>,
    },
}

pub fn run(action: SettingsAction, learner: Option<&str>) -> CliResult {
    let session = open_session(learner)?;

    match action {
        SettingsAction::Show => print_json(&session.hub.settings_model(&session.learner).load()),
        SettingsAction::Set {
            work,
            short_break,
            long_break,
            cycles,
            signal,
            volume,
        } => {
            let now = Utc::now();
            let mut ctx = session.hub.attach(&session.learner, now);
            let current = ctx.state().settings.clone();
            let next = Settings {
                work_minutes: work.unwrap_or(current.work_minutes),
                short_break_minutes: short_break.unwrap_or(current.short_break_minutes),
                long_break_minutes: long_break.unwrap_or(current.long_break_minutes),
                cycles_until_long_break: cycles.unwrap_or(current.cycles_until_long_break),
                completion_signal: signal.unwrap_or(current.completion_signal),
                signal_volume: volume.unwrap_or(current.signal_volume),
                presentation: current.presentation,
            };
            next.validate()?;

            // Settings go through leadership like any other user action.
            ctx.claim(now);
            catch_up(&mut ctx, now);
            ctx.update_settings(next, now)?;
            let saved = ctx.state().settings.clone();
            ctx.detach(now);
            print_json(&saved)
        }
    }
}
