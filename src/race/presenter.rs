//! Results Presenter
//!
//! Renders replicated standings and the local player's finish message.
//! Read-only with respect to the registry: it only consumes
//! "results changed" notifications.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{info, warn};

use crate::core::clock::SimTime;
use crate::core::ordinal::{finish_message, format_ordinal};
use crate::race::registry::ResultsChanged;

/// Slack for comparing accumulated reveal times against tick times.
const REVEAL_EPSILON: SimTime = 1e-9;

/// One line of the results panel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingRow {
    /// 1-based position
    pub position: u32,
    /// Formatted position, e.g. "2nd"
    pub ordinal: String,
    /// Display name or raw id
    pub name: String,
}

impl StandingRow {
    /// Rows for standings in finish order.
    pub fn from_standings(standings: &[String]) -> Vec<StandingRow> {
        standings
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let position = index as u32 + 1;
                StandingRow {
                    position,
                    ordinal: format_ordinal(position),
                    name: name.clone(),
                }
            })
            .collect()
    }
}

/// Output surface for results.
pub trait ResultsDisplay {
    /// Remove all rows.
    fn clear(&mut self);
    /// Make the results panel visible.
    fn show_panel(&mut self);
    /// Hide the results panel.
    fn hide_panel(&mut self);
    /// Append a row.
    fn push_row(&mut self, row: &StandingRow);
    /// Show the local player's finish message.
    fn show_position(&mut self, message: &str);
}

/// Headless results panel that keeps what it shows and logs it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StandingsBoard {
    /// Panel visibility
    pub visible: bool,
    /// Rows revealed so far
    pub rows: Vec<StandingRow>,
    /// Last finish message
    pub position_message: Option<String>,
}

impl ResultsDisplay for StandingsBoard {
    fn clear(&mut self) {
        self.rows.clear();
    }

    fn show_panel(&mut self) {
        self.visible = true;
    }

    fn hide_panel(&mut self) {
        self.visible = false;
    }

    fn push_row(&mut self, row: &StandingRow) {
        info!("{:>5}  {}", row.ordinal, row.name);
        self.rows.push(row.clone());
    }

    fn show_position(&mut self, message: &str) {
        info!("{}", message);
        self.position_message = Some(message.to_string());
    }
}

/// Drives a [`ResultsDisplay`] from registry notifications.
pub struct ResultsPresenter<D> {
    display: D,
    changes: broadcast::Receiver<ResultsChanged>,
    reveal_delay: SimTime,
    pending: VecDeque<StandingRow>,
    next_reveal_at: SimTime,
}

impl<D: ResultsDisplay> ResultsPresenter<D> {
    /// Presenter revealing one row every `reveal_delay` seconds.
    pub fn new(display: D, changes: broadcast::Receiver<ResultsChanged>, reveal_delay: SimTime) -> Self {
        Self {
            display,
            changes,
            reveal_delay: reveal_delay.max(0.0),
            pending: VecDeque::new(),
            next_reveal_at: 0.0,
        }
    }

    /// The display.
    pub fn display(&self) -> &D {
        &self.display
    }

    /// Rows still waiting to be revealed.
    pub fn pending_rows(&self) -> usize {
        self.pending.len()
    }

    /// Once per tick: take the newest notification, then reveal due rows.
    pub fn tick(&mut self, now: SimTime) {
        let mut latest = None;
        loop {
            match self.changes.try_recv() {
                Ok(change) => latest = Some(change),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Results presenter skipped {} notifications", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        if let Some(change) = latest {
            self.present(&change.standings, now);
        }
        self.reveal_due(now);
    }

    /// Show `standings` from scratch. Empty standings leave the UI alone.
    pub fn present(&mut self, standings: &[String], now: SimTime) {
        if standings.is_empty() {
            return;
        }

        self.display.clear();
        self.display.show_panel();
        self.pending = StandingRow::from_standings(standings).into();
        self.next_reveal_at = now;
        self.reveal_due(now);
    }

    /// Show the local player's own finish.
    pub fn show_finish(&mut self, position: u32) {
        self.display.show_position(&finish_message(position));
    }

    /// Hide the results panel.
    pub fn hide(&mut self) {
        self.display.hide_panel();
    }

    fn reveal_due(&mut self, now: SimTime) {
        while now + REVEAL_EPSILON >= self.next_reveal_at {
            let Some(row) = self.pending.pop_front() else {
                break;
            };
            self.display.push_row(&row);
            self.next_reveal_at += self.reveal_delay;
        }
    }
}
