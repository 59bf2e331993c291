//! Conversation window trimming under a token budget.
//!
//! Keeps the leading system messages and as many trailing turns as fit.
//! Tool calls and their results trim as one unit: dropping a call always drops
//! its matching result and vice versa — the window never contains orphans.

use crate::message::Message;

/// Rough token estimate: four characters per token, minimum one.
pub fn estimate_tokens(message: &Message) -> usize {
    (message.text().len() / 4).max(1)
}

/// One indivisible trim unit: a single message, or a call/result pair.
struct Unit {
    indices: Vec<usize>,
    tokens: usize,
}

fn units_of(tail: &[Message]) -> Vec<Unit> {
    let mut units: Vec<Unit> = Vec::new();
    let mut used = vec![false; tail.len()];

    for i in 0..tail.len() {
        if used[i] {
            continue;
        }
        used[i] = true;
        let mut indices = vec![i];
        let mut tokens = estimate_tokens(&tail[i]);

        if let Message::ToolCall { call_id, .. } = &tail[i] {
            // Pair with the first unused matching result after it.
            if let Some(j) = tail.iter().enumerate().skip(i + 1).position(|(k, m)| {
                !used[k] && matches!(m, Message::ToolResult { call_id: rid, .. } if rid == call_id)
            }) {
                let k = j + i + 1;
                used[k] = true;
                tokens += estimate_tokens(&tail[k]);
                indices.push(k);
            }
        }
        units.push(Unit { indices, tokens });
    }
    units
}

/// Trims to `token_budget`: the first `keep_system` system messages always
/// survive; trailing units are kept newest-first until the budget runs out.
/// An unpaired tool call or result (malformed history) is dropped outright.
pub fn trim_messages(
    messages: &[Message],
    keep_system: usize,
    token_budget: usize,
) -> Vec<Message> {
    let mut kept_system: Vec<usize> = Vec::new();
    for (i, m) in messages.iter().enumerate() {
        if m.is_system() && kept_system.len() < keep_system {
            kept_system.push(i);
        }
    }

    let tail: Vec<usize> = (0..messages.len())
        .filter(|i| !kept_system.contains(i))
        .collect();
    let tail_messages: Vec<Message> = tail.iter().map(|&i| messages[i].clone()).collect();
    let units = units_of(&tail_messages);

    // Orphan detection: a ToolResult whose call is absent, or a ToolCall whose
    // result never arrived, forms a 1-element unit containing a tool message.
    let is_orphan = |unit: &Unit| {
        unit.indices.len() == 1
            && matches!(
                tail_messages[unit.indices[0]],
                Message::ToolCall { .. } | Message::ToolResult { .. }
            )
    };

    let system_tokens: usize = kept_system
        .iter()
        .map(|&i| estimate_tokens(&messages[i]))
        .sum();
    let mut budget = token_budget.saturating_sub(system_tokens);

    let mut kept_tail: Vec<usize> = Vec::new();
    for unit in units.iter().rev() {
        if is_orphan(unit) {
            continue;
        }
        if unit.tokens > budget {
            break;
        }
        budget -= unit.tokens;
        kept_tail.extend(unit.indices.iter().map(|&local| tail[local]));
    }
    kept_tail.sort_unstable();

    kept_system
        .into_iter()
        .chain(kept_tail)
        .map(|i| messages[i].clone())
        .collect()
}
