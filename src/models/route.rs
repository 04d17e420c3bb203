// ABOUTME: Route data model: an ordered set of wall holds with start/finish markers and hand assignment

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    pub name: String,
    pub data: RouteData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteData {
    pub grade: Grade,
    pub author: String,
    pub problem: Problem,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub holds: Vec<Hold>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hold {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: HoldType,
    /// Id of the hold this one leads to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hand: Option<Hand>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldType {
    Start,
    Normal,
    Finish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Hand {
    #[serde(rename = "l")]
    Left,
    #[serde(rename = "r")]
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "6a")]
    G6a,
    #[serde(rename = "6a+")]
    G6aPlus,
    #[serde(rename = "6b")]
    G6b,
    #[serde(rename = "6b+")]
    G6bPlus,
    #[serde(rename = "6c")]
    G6c,
    #[serde(rename = "6c+")]
    G6cPlus,
    #[serde(rename = "7a")]
    G7a,
    #[serde(rename = "7a+")]
    G7aPlus,
    #[serde(rename = "7b")]
    G7b,
    #[serde(rename = "7b+")]
    G7bPlus,
    #[serde(rename = "7c")]
    G7c,
    #[serde(rename = "7c+")]
    G7cPlus,
    #[serde(rename = "8a")]
    G8a,
    #[serde(rename = "8a+")]
    G8aPlus,
    #[serde(rename = "8b")]
    G8b,
    #[serde(rename = "8b+")]
    G8bPlus,
    #[serde(rename = "8c")]
    G8c,
    #[serde(rename = "8c+")]
    G8cPlus,
}

/// Problems found by [`Route::lint`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteWarning {
    NoHolds,
    TooManyStarts(usize),
    MissingStart,
    FinishCount(usize),
    DanglingNext { hold: String, next: u64 },
}

impl fmt::Display for RouteWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHolds => write!(f, "route has no holds"),
            Self::TooManyStarts(n) => write!(f, "route has {n} start holds (at most 2)"),
            Self::MissingStart => write!(f, "route has no start hold"),
            Self::FinishCount(n) => write!(f, "route has {n} finish holds (expected 1)"),
            Self::DanglingNext { hold, next } => {
                write!(f, "hold {hold} points at hold {next} which is not on the route")
            }
        }
    }
}

impl Route {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read route from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse route from {}", path.display()))
    }

    pub fn holds(&self) -> &[Hold] {
        &self.data.problem.holds
    }

    pub fn holds_of(&self, kind: HoldType) -> impl Iterator<Item = &Hold> {
        self.holds().iter().filter(move |h| h.kind == kind)
    }

    /// Check the start/finish layout: one or two starts, exactly one finish
    pub fn lint(&self) -> Vec<RouteWarning> {
        let mut warnings = Vec::new();
        if self.holds().is_empty() {
            warnings.push(RouteWarning::NoHolds);
            return warnings;
        }

        let starts = self.holds_of(HoldType::Start).count();
        if starts == 0 {
            warnings.push(RouteWarning::MissingStart);
        } else if starts > 2 {
            warnings.push(RouteWarning::TooManyStarts(starts));
        }

        let finishes = self.holds_of(HoldType::Finish).count();
        if finishes != 1 {
            warnings.push(RouteWarning::FinishCount(finishes));
        }

        for hold in self.holds() {
            if let Some(next) = hold.next {
                let target = next.to_string();
                if !self.holds().iter().any(|h| h.id == target) {
                    warnings.push(RouteWarning::DanglingNext {
                        hold: hold.id.clone(),
                        next,
                    });
                }
            }
        }

        warnings
    }
}
