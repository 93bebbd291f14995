//! Prompt text for every language-model step of a research job.

use super::search::SearchResult;
use super::notes::truncate_chars;

/// Today's date as `YYYY-MM-DD`, local time.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

const SEARCH_READY_RULES: &str = "\
- Each topic MUST be a ready-to-use query for a semantic search engine
- Include the main subject/entity from the research brief in EVERY topic
- If the entity name is ambiguous, add disambiguating terms (e.g., \"Tesla Inc.\" not \"Tesla\")
- Make topics specific enough to avoid generic results (3-10 words)";

pub fn brief_system_prompt(query: &str) -> String {
    format!(
        r#"Based on the user's query, create a focused research brief.

User Query:
{query}

Your task:
- Identify the core research question
- List 3-5 key subtopics that need investigation
- Specify any important constraints (time period, geography, etc.)

Respond with valid JSON in this exact format:
{{
    "title": "Clear, descriptive title (50 chars max)",
    "brief": "Focused research brief describing what to investigate",
    "subtopics": ["Subtopic 1", "Subtopic 2", "Subtopic 3"]
}}

Guidelines:
- Include 3-5 subtopics that are specific and focused
- Each subtopic should represent a distinct research angle
- Keep subtopics concise but descriptive (5-10 words each)

Subtopic format:
{SEARCH_READY_RULES}
- If the entity could mean a company OR a person (e.g., Tesla Inc. vs Nikola Tesla), say which one
- Subtopics are used directly as search queries"#
    )
}

pub fn brief_user_prompt(query: &str) -> String {
    format!("Create a focused research brief and title for: {query}")
}

pub const CLARIFICATION_SYSTEM_PROMPT: &str = "You are an expert at determining if search results \
match user intent. Be decisive - only ask for clarification if truly needed.";

/// Top-5 preview listing plus the decision request.
pub fn clarification_user_prompt(query: &str, results: &[SearchResult]) -> String {
    let listing = results
        .iter()
        .take(5)
        .enumerate()
        .map(|(i, r)| format!("{}. {} - {}...", i + 1, r.title, truncate_chars(&r.url, 60)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Analyze whether these search results match what the user is looking for.

User Query: {query}

Search Results Found:
{listing}

Based on the query and results:
1. Do these results clearly match what the user is asking for?
2. Is the query specific enough that we can proceed with research?
3. Are there any ambiguities that need clarification?

Respond with JSON:
{{
    "needs_clarification": true/false,
    "confidence": "high/medium/low",
    "reason": "brief explanation",
    "clarification_message": "what to ask user if needed, or null"
}}

If confidence is "high" and results clearly match, set needs_clarification to false.
If query is ambiguous or results are unclear, set needs_clarification to true."#
    )
}

pub fn supervisor_system_prompt(date: &str, max_concurrent_research_units: usize) -> String {
    format!(
        r#"You are a research supervisor evaluating research progress and deciding what to research next. Today's date is {date}.

<Task>
You will be given a research brief, a list of topics already researched, and findings from previous research iterations.

Decide whether to research a NEW topic (important gaps remain) or whether research is COMPLETE (coverage is comprehensive).
The system will automatically research the topic you specify.
</Task>

<Instructions>
Respond ONLY with valid JSON, no other text. Start with {{ and end with }}.
{{"action": "research_topic", "topic": "specific topic to research", "reason": "why this topic"}}
OR
{{"action": "research_complete", "reason": "why research is comprehensive"}}
</Instructions>

<Guidelines>
- Focus only on whether there is ENOUGH information to answer the research question
- Research is expensive; as findings accumulate, be more selective about new topics
- Never ask for a topic that is already in the researched list
- Up to {max_concurrent_research_units} topics may be planned per round; ask for one at a time
- Broad questions need shallower research; "detailed" or "comprehensive" questions need more depth
</Guidelines>

<Topic Format>
{SEARCH_READY_RULES}
- Examples: "Tesla Inc. battery technology innovations", "Apple Inc. international market expansion"
</Topic Format>"#
    )
}

/// The per-iteration evaluation request.
pub fn supervisor_user_prompt(
    brief: &str,
    researched: &[String],
    remaining_planned: &[String],
    findings: &str,
    max_concurrent_research_units: usize,
) -> String {
    let planned = if remaining_planned.is_empty() {
        String::new()
    } else {
        format!("\n\nPlanned Topics (prefer these):\n{}", bullet_list(remaining_planned))
    };
    let researched = if researched.is_empty() {
        "None yet".to_string()
    } else {
        bullet_list(researched)
    };

    format!(
        r#"You are evaluating research progress.

Research Brief: {brief}{planned}

Researched Topics:
{researched}
{findings}

Based on the research findings so far:
1. What do we know?
2. What's missing or needs deeper investigation?
3. Should we research a new topic, go deeper on an existing one, or is research complete?

Respond with JSON:
{{
    "action": "research_topic" | "research_complete",
    "topic": "specific topic to research (if action is research_topic)",
    "reason": "why you're making this decision"
}}

Guidelines:
- PREFER topics from the "Planned Topics" list, using their EXACT wording when possible
- If research covers all key aspects, use "research_complete"
- If there are important gaps, use "research_topic" with a specific, focused topic
{SEARCH_READY_RULES}
- Don't repeat topics we've already researched
- Maximum {max_concurrent_research_units} topics can be researched in parallel"#
    )
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Where a subtopic sits in the overall job. Empty when neither is known.
pub fn research_context(original_query: &str, brief: &str) -> String {
    if original_query.is_empty() && brief.is_empty() {
        return String::new();
    }
    let mut context = String::from("\n\nOVERALL RESEARCH CONTEXT:\n");
    if !original_query.is_empty() {
        context.push_str(&format!("Original Research Goal: {original_query}\n"));
    }
    if !brief.is_empty() {
        context.push_str(&format!("Research Brief: {brief}\n"));
    }
    context.push_str(
        "\nRemember: This subtopic is part of a larger research effort. \
         Make sure your findings are relevant to the overall goal.\n",
    );
    context
}

pub fn researcher_system_prompt(date: &str, original_query: &str, brief: &str) -> String {
    let mut prompt = format!(
        "You are a research assistant writing up findings for one subtopic of a larger \
         research effort. Today's date is {date}.\n\n\
         Work only from the numbered sources you are given. Be specific: include facts, \
         figures and short quotes, and cite every claim."
    );
    if !original_query.is_empty() || !brief.is_empty() {
        prompt.push_str("\n\nOVERALL RESEARCH CONTEXT:\n");
        if !original_query.is_empty() {
            prompt.push_str(&format!("Original Research Goal: {original_query}\n"));
        }
        if !brief.is_empty() {
            prompt.push_str(&format!("Research Brief: {brief}\n"));
        }
        prompt.push_str(
            "\nIMPORTANT: Always keep the overall goal in mind and ensure your findings are \
             relevant to answering the main research question.",
        );
    }
    prompt
}

pub fn synthesis_user_prompt(subtopic: &str, context: &str, sources: &str) -> String {
    format!(
        r#"Current Subtopic to Research: {subtopic}
{context}

Sources Found (use these numbers for citations):
{sources}

**IMPORTANT INSTRUCTIONS**:
1. **FIRST: Validate each source** - Check that it is about the CORRECT entity/subject from the research goal:
   - If researching "Tesla Inc." (the car company founded 2003), REJECT sources about "Nikola Tesla" (the inventor)
   - If researching a company, REJECT sources about people with the same name
   - If researching a person, REJECT sources about companies/products with the same name
   - Check dates, context and content to ensure sources match the research subject
2. Write a comprehensive markdown summary about "{subtopic}" using ONLY relevant, validated sources
3. If most/all sources are about the WRONG entity, say so: "Sources found were primarily about [wrong entity] rather than [correct entity]. Limited/no relevant information available."
4. Reference sources using inline citations: [1], [2], [3], etc.
5. You can reference multiple sources like [1][2] or [1,3,5]
6. Do NOT invent information not in the sources
7. Do NOT return a JSON object - just return the markdown summary text
8. Include specific facts, quotes and data from validated sources

Example format:
Tesla was founded in 2003 by Martin Eberhard and Marc Tarpenning [1]. Elon Musk joined as chairman in 2004 [2].

Now write your summary:"#
    )
}

pub fn compression_system_prompt(date: &str) -> String {
    format!(
        r####"You are a research assistant that has gathered findings on a topic. Your job is now to clean up the findings while preserving every relevant statement and source. Today's date is {date}.

<Task>
All relevant information should be repeated and rewritten verbatim, in a cleaner format.
The only purpose of this step is to remove obviously irrelevant or duplicated information.
For example, if three sources all say "X", you could say "These three sources all stated X".
</Task>

<Guidelines>
1. The output must include ALL of the information and sources in the findings.
2. It can be as long as necessary.
3. Keep inline citations for every source.
4. End with a "### Sources" section listing every source with its citation number.
5. Do not lose any source. A later step merges these findings with others.
</Guidelines>

<Citation Rules>
- Assign each unique URL a single citation number
- Number sources sequentially without gaps (1,2,3,4...)
- Format: [1] Source Title: URL
</Citation Rules>

Critical: any information even remotely relevant to the research topic must be preserved verbatim. Do not summarize or paraphrase."####
    )
}

pub const COMPRESSION_INSTRUCTION: &str = "All above messages are about research conducted by an AI \
Researcher. Please clean up these findings.\n\nDO NOT summarize the information. I want the raw \
information returned, just in a cleaner format. Make sure all relevant information is preserved - \
you can rewrite findings verbatim.";

pub fn final_report_prompt(brief: &str, date: &str, findings: &str) -> String {
    format!(
        r####"Based on all the research conducted, create a comprehensive, well-structured answer to the overall research brief:

<Research Brief>
{brief}
</Research Brief>

Today's date is {date}.

Here are the findings from the research that you conducted:

<Findings>
{findings}
</Findings>

Create a detailed answer to the research brief that:
1. Is well organized with headings (# for title, ## for sections, ### for subsections)
2. Includes specific facts and insights from the research
3. Provides balanced, thorough analysis; include everything relevant to the question

Structure the report however best fits the question: a comparison, a list, an overview with concepts, or a single section.

For each section:
- Use simple, clear language
- Never refer to yourself as the writer and do not narrate what you are doing

<Citation Rules>
The findings already contain inline citations [1], [2], [3] with globally consistent numbers.
1. Synthesize information from all sections into one cohesive report
2. Support statements with the existing inline citations, keeping their numbers
3. Write ONLY the report content - do NOT create a "### Sources" section
4. The sources list will be appended automatically
</Citation Rules>"####
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clarification_prompt_lists_top_five() {
        let results: Vec<SearchResult> = (1..=7)
            .map(|i| SearchResult::new(format!("https://tesla.com/{i}"), format!("Page {i}")))
            .collect();
        let prompt = clarification_user_prompt("Tesla", &results);
        assert!(prompt.contains("1. Page 1 - https://tesla.com/1..."));
        assert!(prompt.contains("5. Page 5"));
        assert!(!prompt.contains("Page 6"));
    }

    #[test]
    fn test_supervisor_prompt_without_history() {
        let prompt = supervisor_user_prompt("Brief", &[], &[], "", 3);
        assert!(prompt.contains("Researched Topics:\nNone yet"));
        assert!(!prompt.contains("Planned Topics (prefer these)"));
    }

    #[test]
    fn test_supervisor_prompt_lists_planned_topics() {
        let prompt = supervisor_user_prompt(
            "Brief",
            &["Tesla Inc. history".to_string()],
            &["Tesla Inc. batteries".to_string()],
            "\n\n## Current Research Findings:\n\n",
            3,
        );
        assert!(prompt.contains("Planned Topics (prefer these):\n- Tesla Inc. batteries"));
        assert!(prompt.contains("Researched Topics:\n- Tesla Inc. history"));
    }

    #[test]
    fn test_research_context_empty() {
        assert_eq!(research_context("", ""), "");
        assert!(research_context("Tesla", "").contains("Original Research Goal: Tesla"));
    }
}
