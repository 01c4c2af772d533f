//! Built-in stage templates.
//!
//! Placeholders are `{snake_case}`. `{knowledge}` receives the formatted
//! excerpt block; any placeholder named after a knowledge category (for
//! example `{brand_voice}`) is bound to the bodies of matching excerpts.

use contentforge_shared::Stage;

use crate::template::Template;

const DOCUMENT: &str = "\
KNOWLEDGE DIGEST

The following excerpts form the knowledge pool for this content run.
Company facts come first, market research second, newest first within each.

{knowledge}";

const MONITOR: &str = "\
OPPORTUNITY SCAN

Candidate topic: {topic_seed}

Trend signals considered:
{knowledge}";

const BRIEF: &str = "\
You are a content strategist planning one piece of brand content.

Topic: {topic}
Format: {target_format}

Ground the plan in the knowledge below. Company knowledge is ground truth;
market research supplies angles and evidence. Do not invent facts.

{knowledge}

Produce a content brief with:
- topic: a sharpened, specific working title
- target_format: the format above
- key_points: 3 to 6 concrete points, each with a number, a named example or a mechanism
- constraints: max_length (words, integer) and required_cta (exact call-to-action text)

{format_reminder}";

const PUBLISH: &str = "\
You are a sharp, opinionated writer producing a {target_format}.
Write like a human columnist with a clear worldview, not a content machine.

TOPIC: {topic}

KEY POINTS (cover every one, in prose):
{key_points}

CONSTRAINTS:
{constraints}

BRAND VOICE:
{brand_voice}

SUPPORTING KNOWLEDGE:
{knowledge}

RULES:
- Open mid-scene or with a concrete detail, never a rhetorical question.
- Every claim carries a number, a named example or a mechanism.
- Acknowledge one genuine trade-off.
- No filler phrases, no unearned superlatives, no contrast flips.
- End with the required call to action, verbatim. Nothing after it.

Write the piece now. Output only the piece.";

const ITERATE: &str = "\
You are a senior editor revising a draft {target_format} on \"{topic}\".
The draft failed these quality checks: {failed_checks}

Fix every failed check while keeping facts, names and numbers intact:
- length: cut to fit the word limit in the constraints below
- required_cta: include each required call to action verbatim
- banned_phrases: rewrite any sentence containing a banned phrase
- non_empty: the draft was empty; write the full piece from the key points

KEY POINTS:
{key_points}

CONSTRAINTS:
{constraints}

THE DRAFT TO REVISE:
---
{previous_draft}
---

REFERENCE KNOWLEDGE:
{knowledge}

Output only the revised piece. No notes, no code fences.";

/// One template per stage, ids equal to the stage names.
pub(crate) fn templates() -> Vec<Template> {
    vec![
        Template::new("document", Stage::Document, 6_000, DOCUMENT),
        Template::new("monitor", Stage::Monitor, 3_000, MONITOR),
        Template::new("brief", Stage::Brief, 4_000, BRIEF),
        Template::new("publish", Stage::Publish, 6_000, PUBLISH),
        Template::new("iterate", Stage::Iterate, 3_000, ITERATE),
    ]
}
