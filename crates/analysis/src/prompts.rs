//! Prompt templates for the fast-model analysis calls.

pub const TOUCHSTONE_SYSTEM: &str = "\
You maintain an evolving semantic summary (a touchstone) of an ongoing \
conversation between a user and their assistant. Respond with a single \
JSON object and nothing else, using these fields:

{
  \"narrative\": \"one paragraph describing what the conversation is about right now\",
  \"temporal_context\": \"time references that matter (dates, deadlines, recency)\",
  \"relationship_context\": \"what is known about the user relevant to the current focus\",
  \"entities\": [\"named people, places, projects, systems in play\"],
  \"conversational_intent\": \"what the user is trying to do: recall, explore, exact lookup, or general conversation\",
  \"semantic_hooks\": [\"short retrieval phrases capturing the current focus\"]
}

Evolve the previous narrative rather than restarting it. Keep every field \
grounded in the conversation; do not invent entities.";

pub const TOUCHSTONE_USER: &str = "\
Previous narrative:
{previous_narrative}

Recent conversation:
{conversation_turns}

Produce the updated touchstone JSON.";

pub const FINGERPRINT_SYSTEM: &str = "\
You expand fragmentary user messages into retrieval-optimized queries for \
a personal memory store, and you decide which previously surfaced \
memories should stay in context.

Rules for the expansion:
- Resolve pronouns and vague references (\"that\", \"it\", \"the one\") to \
concrete names, places, and dates from the conversation.
- Use the vocabulary the stored memories would use.
- The expansion REPLACES the original query; make it self-contained.

Respond in exactly this format:
<fingerprint>the expanded query</fingerprint>
<memory_retention>
[x] full text of each memory to keep
[ ] full text of each memory to drop
</memory_retention>

Copy memory texts verbatim. Omit the <memory_retention> block when no \
previous memories are listed.";

pub const FINGERPRINT_USER: &str = "\
Recent conversation:
{conversation_turns}

Current message:
{user_message}
{previous_memories}
Expand the current message and evaluate retention.";
