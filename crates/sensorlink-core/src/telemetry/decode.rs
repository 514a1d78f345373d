//! Line decoding
//!
//! Two wire formats are accepted, tried in order:
//!
//! 1. A JSON record: `{"temp":23.5,"hum":44.0,"count":7,"presc":0}`
//! 2. Labelled text: `Temperatura: 26.1 Umidade: 50.0 Leitura n°: 12 Presenca: 1`
//!
//! Anything else is a diagnostic line from the sketch and yields `None`.

use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::sync::OnceLock;

use super::Reading;

#[derive(Deserialize)]
struct WireRecord {
    temp: f64,
    hum: f64,
    #[serde(default)]
    count: u64,
    #[serde(default, deserialize_with = "presence_flag")]
    presc: bool,
}

/// Sketches send presence as 0/1 or as a JSON boolean
fn presence_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(u64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Number(n) => n != 0,
    })
}

struct LabelledPatterns {
    temperature: Regex,
    humidity: Regex,
    counter: Regex,
    presence: Regex,
}

fn labelled_patterns() -> &'static LabelledPatterns {
    static PATTERNS: OnceLock<LabelledPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| LabelledPatterns {
        temperature: Regex::new(r"Temperatura:\s*(-?\d+\.?\d*)").unwrap(),
        humidity: Regex::new(r"Umidade:\s*(\d+\.?\d*)").unwrap(),
        counter: Regex::new(r"Leitura n°:\s*(\d+)").unwrap(),
        presence: Regex::new(r"Presenca:\s*([01])").unwrap(),
    })
}

fn capture<'a>(re: &Regex, line: &'a str) -> Option<&'a str> {
    re.captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn decode_json(line: &str) -> Option<Reading> {
    let record: WireRecord = serde_json::from_str(line).ok()?;
    Some(Reading {
        temperature: record.temp,
        humidity: record.hum,
        counter: record.count,
        presence: record.presc,
    })
}

fn decode_labelled(line: &str) -> Option<Reading> {
    let patterns = labelled_patterns();
    let temperature = capture(&patterns.temperature, line)?.parse().ok()?;
    let humidity = capture(&patterns.humidity, line)?.parse().ok()?;
    let counter = capture(&patterns.counter, line)
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let presence = capture(&patterns.presence, line) == Some("1");

    Some(Reading {
        temperature,
        humidity,
        counter,
        presence,
    })
}

/// Decode one framed line
pub fn decode(line: &str) -> Option<Reading> {
    let reading = decode_json(line).or_else(|| decode_labelled(line));
    if reading.is_none() {
        tracing::debug!("Skipping undecodable line: {line:?}");
    }
    reading
}
