use corpus::text::is_cjk;
use store::ScoredChunk;

pub const DEFAULT_CONTEXT_BUDGET: usize = 6000;

/// Rough token cost: dense CJK scripts run about one token per character,
/// ASCII-like text about four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cost = 0.0f32;
    for c in text.chars() {
        cost += if is_cjk(c) { 1.0 } else { 0.25 };
    }
    cost.ceil() as usize
}

/// Strip any path prefix, whichever separator style produced it.
pub fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Format ranked chunks into an attributable context block, stopping
/// before the token budget is exceeded. The first candidate is always
/// included even if it alone overshoots: one source beats none.
pub fn build_context(ranked: &[ScoredChunk], budget: usize) -> String {
    let mut context = String::new();
    let mut used = 0usize;

    for (i, scored) in ranked.iter().enumerate() {
        let page_info = scored
            .chunk
            .page
            .map(|p| format!(" (Page {})", p))
            .unwrap_or_default();
        let block = format!(
            "---\n[Source {}: {}{}]\n{}\n",
            i + 1,
            basename(&scored.chunk.source),
            page_info,
            scored.chunk.text
        );

        let cost = estimate_tokens(&block);
        if used + cost > budget && !context.is_empty() {
            break;
        }
        context.push_str(&block);
        used += cost;
    }

    context
}
