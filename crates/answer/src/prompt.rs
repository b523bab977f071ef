use serde::Deserialize;

use crate::llm::ChatMessage;

/// How many history turns survive the window.
pub const HISTORY_WINDOW: usize = 10;

/// Fixed grounding instructions: answer only from the supplied 資料,
/// admit when they don't cover the question, integrate and cite sources,
/// and keep simple answers simple.
pub const SYSTEM_PROMPT: &str = "あなたは優秀なリサーチアシスタントです。提供された資料の内容を深く理解し、それらを統合して洞察に満ちた回答を作成することが求められています。

以下のガイドラインに厳密に従ってください：
1. **資料への完全な準拠**: 回答は提供された【資料】にある情報のみに基づいている必要があります。外部の知識を使ってはいけません。
2. **統合と推論**: 単に事実を並べるだけでなく、複数の資料からの情報を関連付け、\"なぜそうなるのか\" という背景や理由を含めて説明してください。
3. **明確な引用**: 情報を提示する際は、必ずその情報源を明記してください。例:「〜であることが報告されています (Source 1: report.pdf)」。
4. **簡潔さ**: 単純な質問には短く簡潔に答えてください。見出しや箇条書きは、複雑なトピックを整理する場合にのみ使ってください。
5. **回答不能な場合**: 資料に答えがない場合は、正直に「資料に記載がありません」と答えてください。推測で答えないでください。
6. **会話の継続性**: 会話履歴が提供されている場合は、前の会話の内容を踏まえて回答してください。

あなたの目標は、一貫した丁寧な口調で、ユーザーが資料全体の本質を理解できるようにサポートすることです。";

/// One turn of caller-supplied conversation history.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub text: String,
}

/// Assemble the model-ready message sequence: system instructions, the
/// windowed history, then the user message carrying context, question and
/// an optional image.
pub fn build_messages(
    query: &str,
    context_text: &str,
    history: &[ChatTurn],
    image: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(SYSTEM_PROMPT)];

    let start = history.len().saturating_sub(HISTORY_WINDOW);
    for turn in &history[start..] {
        if turn.text.is_empty() {
            continue;
        }
        match turn.role.as_str() {
            "user" => messages.push(ChatMessage::user(turn.text.clone())),
            // Older clients label assistant turns "system".
            "assistant" | "system" => messages.push(ChatMessage::assistant(turn.text.clone())),
            _ => {}
        }
    }

    let user_text = format!(
        "以下の【資料】を使用して、ユーザーの【質問】に詳しく答えてください。
もし画像が提供されている場合は、その画像の内容も考慮して回答してください。

【資料】
{context_text}

【質問】
{query}

回答:"
    );

    match image {
        Some(image) => messages.push(ChatMessage::user_with_image(user_text, image)),
        None => messages.push(ChatMessage::user(user_text)),
    }

    messages
}
