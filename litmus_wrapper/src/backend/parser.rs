//! Parser for herd-style observation output.
//!
//! The dialect is a loose line format shared by the herd family: `state:`
//! lines carry `{ var=val, … }` bindings, a bare `Sat`/`Unsat`/`Undef` line
//! carries the outcome, `witness:` lines list witnessing states, and a
//! `condition:` line may mark the postcondition as existential.

use lithunt_core::obs::{Obs, State, FLAG_EXIST, FLAG_SAT, FLAG_UNDEF, FLAG_UNSAT};
use std::io::{self, BufRead};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed state line: {0:?}")]
    BadState(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn parse<R: BufRead>(r: R) -> Result<Obs, ParseError> {
    let mut obs = Obs::default();
    for line in r.lines() {
        let line = line?;
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("state:") {
            obs.states.push(parse_state(rest)?);
        } else if let Some(rest) = line.strip_prefix("witness:") {
            obs.witnesses.push(parse_state(rest)?);
        } else if let Some(rest) = line.strip_prefix("condition:") {
            if rest.trim().starts_with("exists") {
                obs.flags |= FLAG_EXIST;
            }
        } else {
            match line {
                "Sat" => obs.flags |= FLAG_SAT,
                "Unsat" => obs.flags |= FLAG_UNSAT,
                "Undef" => obs.flags |= FLAG_UNDEF,
                _ => {} // herd-style output carries plenty we don't need
            }
        }
    }
    Ok(obs)
}

fn parse_state(s: &str) -> Result<State, ParseError> {
    let s = s.trim();
    let inner = s
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| ParseError::BadState(s.to_string()))?;
    let mut state = State::new();
    for pair in inner.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| ParseError::BadState(pair.to_string()))?;
        state.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(state)
}
