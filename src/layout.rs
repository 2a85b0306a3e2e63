pub use keyweave_protocol::layout::{LayoutString, ValidationError};
use std::collections::HashSet;

/// Checks a layout against the evaluator's permutable keys.
///
/// Order of checks: length, then duplicate symbols, then symbols the keyboard does not know.
pub fn validate(layout: &LayoutString, keys: &[String]) -> Result<(), ValidationError> {
    let actual = layout.symbol_count();
    if actual != keys.len() {
        return Err(ValidationError::Length {
            expected: keys.len(),
            actual,
        });
    }

    let duplicates = duplicate_symbols(layout);
    if !duplicates.is_empty() {
        return Err(ValidationError::Duplicates(duplicates));
    }

    let unknown = unknown_symbols(layout, keys);
    if !unknown.is_empty() {
        return Err(ValidationError::Unknown(unknown));
    }

    Ok(())
}

/// User-facing explanation of what is wrong with a layout, `None` when it is valid.
///
/// Unlike [`validate`] this reports every problem at once.
pub fn feedback(layout: &LayoutString, keys: &[String]) -> Option<String> {
    let duplicates = duplicate_symbols(layout);
    let missing = missing_symbols(layout, keys);
    let unknown = unknown_symbols(layout, keys);

    let mut msg = String::new();
    if !duplicates.is_empty() {
        msg.push_str(&format!("Duplicates: \"{}\". ", duplicates));
    }
    if !missing.is_empty() {
        msg.push_str(&format!("Missing: \"{}\". ", missing));
    }
    if !unknown.is_empty() {
        msg.push_str(&format!("Unknown: \"{}\". ", unknown));
    }

    if msg.is_empty() && layout.symbol_count() != keys.len() {
        msg = format!(
            "Layout has {} symbols, expected {}. ",
            layout.symbol_count(),
            keys.len()
        );
    }

    if msg.is_empty() {
        None
    } else {
        Some(msg)
    }
}

/// Shuffles the permutable keys while every fixed symbol keeps its position.
pub fn random_layout(rng: &mut fastrand::Rng, keys: &[String], fixed: &str) -> LayoutString {
    let is_fixed = |k: &String| k.chars().all(|c| fixed.contains(c));

    let mut movable: Vec<&String> = keys.iter().filter(|k| !is_fixed(k)).collect();
    rng.shuffle(&mut movable);

    let mut movable = movable.into_iter();
    let mut out = String::new();
    for key in keys {
        if is_fixed(key) {
            out.push_str(key);
        } else if let Some(next) = movable.next() {
            out.push_str(next);
        }
    }
    LayoutString::new(out)
}

fn duplicate_symbols(layout: &LayoutString) -> String {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut out = String::new();
    for c in layout.symbols() {
        if !seen.insert(c) && reported.insert(c) {
            out.push(c);
        }
    }
    out
}

fn unknown_symbols(layout: &LayoutString, keys: &[String]) -> String {
    let known: HashSet<char> = keys.iter().flat_map(|k| k.chars()).collect();
    let mut reported = HashSet::new();
    layout
        .symbols()
        .filter(|c| !known.contains(c) && reported.insert(*c))
        .collect()
}

fn missing_symbols(layout: &LayoutString, keys: &[String]) -> String {
    let present: HashSet<char> = layout.symbols().collect();
    keys.iter()
        .flat_map(|k| k.chars())
        .filter(|c| !present.contains(c))
        .collect()
}
