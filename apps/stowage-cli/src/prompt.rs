//! Terminal answers to job decisions.

use std::io::{self, BufRead, Write};

use stowage_job::{DecisionAction, DecisionKind, DecisionRequest, DecisionResponse};

use crate::config::{CollisionPolicy, ErrorPolicy};

/// Configured automatic answers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Policies {
    pub on_collision: CollisionPolicy,
    pub on_error: ErrorPolicy,
}

impl Policies {
    /// Answers `request` without asking, if a policy covers it.
    pub fn auto_answer(&self, request: &DecisionRequest) -> Option<DecisionResponse> {
        let action = match request.kind {
            DecisionKind::Collision { .. } => match self.on_collision {
                CollisionPolicy::Ask => return None,
                CollisionPolicy::Overwrite => DecisionAction::Overwrite,
                CollisionPolicy::Cancel => DecisionAction::Cancel,
            },
            DecisionKind::Error => match self.on_error {
                ErrorPolicy::Ask => return None,
                ErrorPolicy::Skip if request.offers(DecisionAction::Skip) => DecisionAction::Skip,
                ErrorPolicy::Skip | ErrorPolicy::Cancel => DecisionAction::Cancel,
            },
        };
        Some(DecisionResponse::choose(action))
    }
}

fn key(action: DecisionAction) -> &'static str {
    match action {
        DecisionAction::Retry => "[r]etry",
        DecisionAction::Skip => "[s]kip",
        DecisionAction::Cancel => "[c]ancel",
        DecisionAction::Overwrite => "[o]verwrite",
    }
}

/// Builds the question line shown to the user.
pub fn render(request: &DecisionRequest) -> String {
    let mut options: Vec<&str> = request.options.iter().map(|a| key(*a)).collect();
    if request.allow_apply_to_all {
        options.push("[S]kip all");
    }
    format!("{}: {}\n{}? ", request.title, request.message, options.join(" / "))
}

/// Parses a typed answer. Empty or unknown input yields `None`.
pub fn parse_answer(input: &str, request: &DecisionRequest) -> Option<DecisionResponse> {
    let input = input.trim();
    if input == "S" && request.allow_apply_to_all {
        return Some(DecisionResponse::choose_for_all(DecisionAction::Skip));
    }
    let action = match input.to_ascii_lowercase().as_str() {
        "r" | "retry" => DecisionAction::Retry,
        "s" | "skip" => DecisionAction::Skip,
        "c" | "cancel" => DecisionAction::Cancel,
        "o" | "overwrite" => DecisionAction::Overwrite,
        _ => return None,
    };
    request
        .offers(action)
        .then(|| DecisionResponse::choose(action))
}

/// Asks on the terminal until a valid answer; end of input dismisses.
pub fn ask(request: &DecisionRequest) -> io::Result<DecisionResponse> {
    let stdin = io::stdin();
    let mut stderr = io::stderr();
    loop {
        write!(stderr, "\n{}", render(request))?;
        stderr.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(DecisionResponse::dismissed());
        }
        if let Some(response) = parse_answer(&line, request) {
            return Ok(response);
        }
    }
}
