use crate::analysis::Symbol;

pub const SYSTEM_PROMPT: &str = "\
You document source code. Summarize each code block you are given.

Reply in Markdown using exactly this layout:
**Summary:** <what the code does, in one line>
**Logic:**
1. <step>
2. <step>
3. <step>

Use three to five pseudocode steps. Describe behaviour, not syntax. Keep it short.";

/// Kind, signature and full code of one symbol.
pub fn build_user_prompt(symbol: &Symbol) -> String {
    format!(
        "Analyze this {kind}:\n\n```\n{signature}\n\n{code}\n```\n\nAnswer in the layout described above.",
        kind = symbol.kind,
        signature = symbol.signature,
        code = symbol.code,
    )
}
