//! Prompt text for every generation call the pipeline makes.

use crate::utils::text::excerpt;

pub fn synopsis(idea: &str, tone: &str, soft_target: u64) -> String {
    format!(
        "Generate ONLY a 500-1000-word novel synopsis. Do not include any other text.\n\n\
         Novel Idea: {}\n\
         Tone: {}\n\
         Target Word Count: {}\n\n\
         Cover the setting, the main characters, the central themes and the full plot arc.",
        idea, tone, soft_target
    )
}

pub fn refine_synopsis_auto(synopsis: &str) -> String {
    format!(
        "Revise this synopsis:\n\n{}\n\n\
         Enhance depth, coherence and tone alignment, and replace overused vocabulary.\n\
         Return ONLY the revised synopsis.",
        synopsis
    )
}

fn refinement(what: &str, context: &[(&str, &str)], current: &str, feedback: &str, rules: &[&str]) -> String {
    let mut prompt = format!("Refine this {} based on the following feedback:\n\n", what);
    for (label, text) in context {
        prompt.push_str(&format!("{}:\n{}\n\n", label, text));
    }
    prompt.push_str(&format!(
        "CURRENT {}:\n{}\n\nUSER FEEDBACK:\n{}\n\nINSTRUCTIONS:\n",
        what.to_uppercase(),
        current,
        feedback
    ));
    for rule in rules {
        prompt.push_str(&format!("- {}\n", rule));
    }
    prompt
}

pub fn refine_synopsis(idea: &str, tone: &str, current: &str, feedback: &str) -> String {
    refinement(
        "synopsis",
        &[("ORIGINAL IDEA", idea), ("TONE", tone)],
        current,
        feedback,
        &[
            "Apply the feedback while keeping the core premise",
            "Keep it between 500 and 1000 words",
            "Return ONLY the refined synopsis",
        ],
    )
}

pub fn outline(synopsis: &str, tone: &str, soft_target: u64, chapters: u32) -> String {
    format!(
        "Create a detailed {} chapter outline for this novel.\n\n\
         SYNOPSIS:\n{}\n\n\
         Tone: {}\n\
         Target Word Count: {}\n\n\
         For each chapter give a line starting with \"Chapter N:\" and a title, followed by a \
         100-200-word summary of its events. Return ONLY the outline.",
        chapters, synopsis, tone, soft_target
    )
}

pub fn refine_outline(synopsis: &str, current: &str, feedback: &str) -> String {
    refinement(
        "outline",
        &[("SYNOPSIS", synopsis)],
        current,
        feedback,
        &[
            "Keep one \"Chapter N:\" line per chapter",
            "Keep the chapter count unless the feedback asks otherwise",
            "Return ONLY the refined outline",
        ],
    )
}

pub fn characters(outline: &str, synopsis: &str) -> String {
    format!(
        "Based on this outline and synopsis, create the main characters.\n\n\
         OUTLINE:\n{}\n\n\
         SYNOPSIS:\n{}\n\n\
         Return ONLY a JSON array where each entry has the fields \
         Name, Age, Background, Traits, Arc and Relationships.",
        outline, synopsis
    )
}

pub fn refine_characters(outline: &str, current: &str, feedback: &str) -> String {
    refinement(
        "characters",
        &[("OUTLINE", excerpt(outline, 3000))],
        current,
        feedback,
        &[
            "Keep the JSON array format",
            "Return ONLY the refined JSON",
        ],
    )
}

pub fn world(outline: &str) -> String {
    format!(
        "Based on this outline, build the world of the novel.\n\n\
         OUTLINE:\n{}\n\n\
         Return ONLY a JSON object with the keys Tech, Culture, Geography, History and Rules.",
        outline
    )
}

pub fn refine_world(outline: &str, current: &str, feedback: &str) -> String {
    refinement(
        "world",
        &[("OUTLINE", excerpt(outline, 3000))],
        current,
        feedback,
        &[
            "Keep the JSON object format",
            "Return ONLY the refined JSON",
        ],
    )
}

pub fn timeline(outline: &str, tone: &str) -> String {
    format!(
        "Create a chronological timeline for this novel with dates, locations and key events \
         for every chapter.\n\n\
         OUTLINE:\n{}\n\n\
         Tone: {}\n\n\
         Return ONLY the timeline.",
        outline, tone
    )
}

pub fn refine_timeline(outline: &str, current: &str, feedback: &str) -> String {
    refinement(
        "timeline",
        &[("OUTLINE", excerpt(outline, 3000))],
        current,
        feedback,
        &[
            "Keep dates, locations and events for every chapter",
            "Return ONLY the refined timeline",
        ],
    )
}

pub fn research(chapter: u32, outline: &str, world: &str, characters: &str) -> String {
    format!(
        "Generate 3-5 research points for Chapter {} of this novel: facts, period details or \
         technical background the prose should get right.\n\n\
         Outline:\n{}\n\n\
         World:\n{}\n\n\
         Characters:\n{}\n\n\
         Return ONLY the research points as a list.",
        chapter,
        excerpt(outline, 2000),
        excerpt(world, 1000),
        excerpt(characters, 1000)
    )
}

pub struct DraftContext<'a> {
    pub chapter: u32,
    pub section: u32,
    pub timeline: &'a str,
    pub research: &'a str,
    pub tone: &'a str,
    pub context: &'a str,
    pub characters: &'a str,
    pub world: &'a str,
}

pub fn draft(ctx: &DraftContext<'_>) -> String {
    format!(
        "Write 500-1000 words for Chapter {}, Section {} of the novel.\n\n\
         Timeline:\n{}\n\n\
         Research:\n{}\n\n\
         Tone: {}\n\n\
         Story so far:\n{}\n\n\
         Characters:\n{}\n\n\
         World:\n{}\n\n\
         Return ONLY the prose.",
        ctx.chapter,
        ctx.section,
        excerpt(ctx.timeline, 1500),
        ctx.research,
        ctx.tone,
        excerpt(ctx.context, 1500),
        excerpt(ctx.characters, 1000),
        excerpt(ctx.world, 1000)
    )
}

pub fn polish(draft: &str) -> String {
    format!(
        "Polish this draft for coherence, flow and transitions:\n\n{}\n\n\
         Flag areas that need attention inline as [FLAG: description].\n\
         List the top 5 overused words at the end.\n\
         Return the polished version with [FLAG: ...] markers.",
        draft
    )
}

pub fn enhance_vocabulary(polished: &str, flags: &[String]) -> String {
    format!(
        "Revise the draft below, replacing overused words with varied synonyms while keeping \
         the meaning and tone.\n\n\
         DRAFT:\n{}\n\n\
         FLAGS:\n{}\n\n\
         Return ONLY the revised draft.",
        polished,
        flags.join("\n")
    )
}

pub fn refine_section(buffer: &str, feedback: &str, tone: &str) -> String {
    refinement(
        "section",
        &[("TONE", tone)],
        buffer,
        feedback,
        &[
            "Keep the length between 500 and 1000 words",
            "Return ONLY the revised section",
        ],
    )
}

pub fn polish_flow(text: &str) -> String {
    format!(
        "Improve the flow and transitions of this section without changing events:\n\n{}\n\n\
         Return ONLY the revised section.",
        text
    )
}

pub fn polish_style(text: &str) -> String {
    format!(
        "Improve the vocabulary and style of this section, replacing repeated words:\n\n{}\n\n\
         Return ONLY the revised section.",
        text
    )
}

pub fn summary(section: &str) -> String {
    format!("{}\n\nSummarize this section in 100 words.", section)
}

pub fn context_extraction(section: &str) -> String {
    format!(
        "Extract key events and mood from this section: \"{}...\" \
         Format as: Events: [list], Mood: [description].",
        excerpt(section, 500)
    )
}

pub fn consistency_check(story: &str, characters: &str, world: &str, timeline: &str) -> String {
    format!(
        "Check this novel for inconsistencies in plot, characters, world rules and timeline.\n\n\
         STORY:\n{}\n\n\
         CHARACTERS:\n{}\n\n\
         WORLD:\n{}\n\n\
         TIMELINE:\n{}\n\n\
         List each inconsistency found. Return ONLY the issues or \"No issues found.\"",
        excerpt(story, 5000),
        excerpt(characters, 2000),
        excerpt(world, 2000),
        excerpt(timeline, 2000)
    )
}

/// Lines of a polish pass that carry an inline flag or the overuse list.
pub fn extract_flags(polished: &str) -> Vec<String> {
    polished
        .lines()
        .filter(|line| line.contains("[FLAG:") || line.to_lowercase().contains("overused words"))
        .map(|line| line.trim().to_string())
        .collect()
}

/// Whether any flag is about word choice.
pub fn needs_vocabulary_pass(flags: &[String]) -> bool {
    flags.iter().any(|flag| {
        let flag = flag.to_lowercase();
        flag.contains("overuse") || flag.contains("word") || flag.contains("synonym")
    })
}

/// True when the check reported nothing to fix.
pub fn reports_no_issues(report: &str) -> bool {
    report.to_lowercase().contains("no issues")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_found_in_polish_output() {
        let polished = "The storm broke.\n[FLAG: pacing drags here]\nShe ran.\nTop 5 overused words: dark, very, just, really, suddenly";
        let flags = extract_flags(polished);
        assert_eq!(flags.len(), 2);
        assert!(needs_vocabulary_pass(&flags));
    }

    #[test]
    fn test_non_vocabulary_flags_skip_enhancement() {
        let flags = extract_flags("Text\n[FLAG: timeline contradiction with chapter 2]\n");
        assert_eq!(flags.len(), 1);
        assert!(!needs_vocabulary_pass(&flags));
        assert!(!needs_vocabulary_pass(&[]));
    }

    #[test]
    fn test_synonym_flag_triggers_enhancement() {
        let flags = vec!["[FLAG: consider a Synonym for 'gleaming']".to_string()];
        assert!(needs_vocabulary_pass(&flags));
    }

    #[test]
    fn test_no_issues_detection() {
        assert!(reports_no_issues("No issues found."));
        assert!(reports_no_issues("After review: NO ISSUES detected"));
        assert!(!reports_no_issues("1. Mara's age changes between chapters"));
    }

    #[test]
    fn test_refinement_layout() {
        let prompt = refine_outline("A synopsis", "Chapter 1: Start", "More conflict");
        assert!(prompt.starts_with("Refine this outline based on the following feedback:"));
        assert!(prompt.contains("SYNOPSIS:\nA synopsis"));
        assert!(prompt.contains("CURRENT OUTLINE:\nChapter 1: Start"));
        assert!(prompt.contains("USER FEEDBACK:\nMore conflict"));
        assert!(prompt.trim_end().ends_with("Return ONLY the refined outline"));
    }

    #[test]
    fn test_context_prompt_truncates_section() {
        let long = "x".repeat(2000);
        let prompt = context_extraction(&long);
        assert!(prompt.contains(&format!("\"{}...\"", "x".repeat(500))));
        assert!(!prompt.contains(&"x".repeat(501)));
    }
}
