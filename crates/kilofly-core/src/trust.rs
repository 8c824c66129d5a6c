//! Trust score levels and the notifier that announces upward changes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::notifications::Toast;

/// Discrete trust level derived from a 0-100 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrustLevel {
    Bronze,
    Argent,
    Or,
    Platine,
}

impl TrustLevel {
    /// Highest first
    const LADDER: [TrustLevel; 4] = [
        TrustLevel::Platine,
        TrustLevel::Or,
        TrustLevel::Argent,
        TrustLevel::Bronze,
    ];

    pub fn from_score(score: u32) -> Self {
        Self::LADDER
            .into_iter()
            .find(|level| score >= level.min_score())
            .unwrap_or(TrustLevel::Bronze)
    }

    pub fn min_score(&self) -> u32 {
        match self {
            TrustLevel::Platine => 80,
            TrustLevel::Or => 60,
            TrustLevel::Argent => 40,
            TrustLevel::Bronze => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrustLevel::Platine => "Platine",
            TrustLevel::Or => "Or",
            TrustLevel::Argent => "Argent",
            TrustLevel::Bronze => "Bronze",
        }
    }

    /// Badge icon shown next to the level
    pub fn icon(&self) -> &'static str {
        match self {
            TrustLevel::Platine => "💎",
            TrustLevel::Or => "🥇",
            TrustLevel::Argent => "🥈",
            TrustLevel::Bronze => "🥉",
        }
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustTransition {
    LevelUp {
        from: TrustLevel,
        to: TrustLevel,
        score: u32,
    },
    PointsGained { delta: u32, score: u32 },
}

impl TrustTransition {
    /// Signed delta label, e.g. "+7"
    pub fn delta_label(delta: u32) -> String {
        format!("+{}", delta)
    }

    pub fn to_toast(&self) -> Toast {
        match self {
            TrustTransition::LevelUp { to, score, .. } => Toast::success(
                format!("{} Niveau {} atteint !", to.icon(), to.label()),
                format!("Votre score de confiance est maintenant de {}.", score),
            ),
            TrustTransition::PointsGained { delta, score } => Toast::info(
                format!("{} points de confiance", Self::delta_label(*delta)),
                format!("Votre score de confiance est maintenant de {}.", score),
            ),
        }
    }
}

/// Compares consecutive score observations. The first observation only sets
/// the baseline; level changes win over point gains; decreases are silent.
#[derive(Debug, Clone)]
pub struct TrustNotifier {
    last_score: Option<u32>,
    point_gain_threshold: u32,
}

impl TrustNotifier {
    pub fn new(point_gain_threshold: u32) -> Self {
        Self {
            last_score: None,
            point_gain_threshold,
        }
    }

    pub fn observe(&mut self, score: u32) -> Option<TrustTransition> {
        let previous = self.last_score.replace(score)?;

        let from = TrustLevel::from_score(previous);
        let to = TrustLevel::from_score(score);
        if to > from {
            return Some(TrustTransition::LevelUp { from, to, score });
        }

        let delta = score.saturating_sub(previous);
        if delta > 0 && delta >= self.point_gain_threshold {
            return Some(TrustTransition::PointsGained { delta, score });
        }
        None
    }

    /// Forget the baseline, e.g. when another user signs in
    pub fn reset(&mut self) {
        self.last_score = None;
    }

    pub fn last_score(&self) -> Option<u32> {
        self.last_score
    }
}
