//! Context builder for assembling prompts

use diarist_core::config::{BackgroundConfig, Config, DiaryConfig};
use diarist_core::records::Speaker;
use diarist_core::utils::truncate_chars;
use diarist_core::{DiaryEntry, PeriodSummary, TimeBucket};
use diarist_providers::Message;

/// JSON shape every diary and summary response must follow
pub const OUTPUT_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
{"title": "<short title>", "content": "<full text>"}"#;

const SECTION_SEPARATOR: &str = "\n---\n";

/// Builds the messages sent to the generation backend
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    diary: DiaryConfig,
    background: BackgroundConfig,
}

impl ContextBuilder {
    pub fn new(diary: DiaryConfig, background: BackgroundConfig) -> Self {
        Self { diary, background }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.diary.clone(), config.background.clone())
    }

    /// Render the conversations of one date as plain text
    pub fn render_bucket(&self, bucket: &TimeBucket) -> String {
        bucket
            .records
            .iter()
            .map(|record| {
                let mut text = format!(
                    "Topic: {}\n",
                    record.title.as_deref().unwrap_or("Untitled")
                );
                for utterance in &record.utterances {
                    let who = match utterance.speaker {
                        Speaker::User => "Me",
                        _ => "Assistant",
                    };
                    text.push_str(&format!(
                        "{}: {}\n",
                        who,
                        truncate_chars(&utterance.text, self.diary.max_message_chars)
                    ));
                }
                text
            })
            .collect::<Vec<_>>()
            .join(SECTION_SEPARATOR)
    }

    fn render_memory(&self, memory: &[DiaryEntry]) -> String {
        let start = memory.len().saturating_sub(self.diary.context_window);
        memory[start..]
            .iter()
            .map(|e| format!("Date: {}\nTitle: {}\n{}", e.date_id(), e.title, e.body))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n")
    }

    /// System prompt for the diary entry of a date in `year`
    pub fn build_entry_system_prompt(&self, year: i32) -> String {
        let mut prompt = format!(
            "You are the user in the conversations below, all of them held between you and an AI assistant. \
Write an objective diary entry for the day in the first person, in {}.",
            self.diary.language
        );

        let background = self.background.until(year);
        if !background.is_empty() {
            prompt.push_str(&format!(
                "\n\n## Background (do not quote it in the diary)\n{}",
                background
            ));
        }

        prompt.push_str(
            "\n\nNote: while writing today's entry you cannot know anything that happens after today.",
        );

        if !self.diary.example_diary.trim().is_empty() {
            prompt.push_str(&format!(
                "\n\n## Example entry\n{}",
                self.diary.example_diary.trim()
            ));
        }

        prompt.push_str(
            r#"

## Requirements
1. Give the entry a short title summarizing the day and a body.
2. The body reflects what I thought about and what happened that day.
3. Focus on the day itself.
4. Every sentence is first person: my own thoughts and actions, never guesses about the other party."#,
        );

        if !self.diary.requirements.trim().is_empty() {
            prompt.push_str(&format!("\n{}", self.diary.requirements.trim()));
        }

        prompt.push_str("\n\n## Output\n");
        prompt.push_str(OUTPUT_FORMAT);
        prompt
    }

    /// Messages for one date. `memory` must only hold entries dated before
    /// the bucket.
    pub fn build_entry_messages(&self, bucket: &TimeBucket, memory: &[DiaryEntry]) -> Vec<Message> {
        let mut user = String::new();
        if !memory.is_empty() && self.diary.context_window > 0 {
            user.push_str(&format!(
                "Recent diary entries (up to {}), keep the narrative consistent with them:\n\n{}\n\n",
                self.diary.context_window,
                self.render_memory(memory)
            ));
        }
        user.push_str(&format!(
            "Date: {}\n\nToday's conversations:\n{}\n\nWrite today's diary entry with a title and a body.",
            bucket.id(),
            self.render_bucket(bucket)
        ));

        vec![
            Message::system(self.build_entry_system_prompt(bucket.year())),
            Message::user(user),
        ]
    }

    /// Messages for the summary of `year`
    pub fn build_summary_messages(
        &self,
        year: i32,
        entries: &[DiaryEntry],
        previous: Option<&PeriodSummary>,
    ) -> Vec<Message> {
        let mut system = format!(
            "You are the user who wrote the diary below. Write a personal summary of the year {} in the first person, in {}.",
            year, self.diary.language
        );
        let background = self.background.until(year);
        if !background.is_empty() {
            system.push_str(&format!("\n\n## Background\n{}", background));
        }
        system.push_str(&format!(
            r#"

## Requirements
1. Focus on personal growth, thinking, life changes, relationships and shifts in mindset rather than technical detail.
2. Distill the most important lessons of the year from the entries.
3. If last year's summary is given, compare and describe what changed.
4. You cannot know the future: the summary of {} never mentions later events.

## Output
{}"#,
            year, OUTPUT_FORMAT
        ));

        let mut user = String::new();
        if let Some(previous) = previous {
            user.push_str(&format!(
                "Summary of {} for reference:\n\n# {}\n{}\n\n---\n\n",
                previous.year, previous.title, previous.body
            ));
        }
        let all = entries
            .iter()
            .map(|e| format!("[{}] {}\n{}", e.date_id(), e.title, e.body))
            .collect::<Vec<_>>()
            .join("\n---\n\n");
        user.push_str(&format!(
            "All diary entries of {}:\n\n{}\n\nWrite the summary of the year based on these entries.",
            year, all
        ));

        vec![Message::system(system), Message::user(user)]
    }
}

/// Messages asking the backend to split a biography into yearly notes
pub fn build_background_messages(biography: &str, first_year: i32, last_year: i32) -> Vec<Message> {
    let system = format!(
        r#"You are helping to parse a plain text biography into year-by-year entries.

Requirements:
1. Produce one key per year from {first} to {last}, plus a "before" key for everything earlier than {first}.
2. Each value is a concise summary of that year (1-2 sentences).
3. If a year is not mentioned, infer it from context or write "no record".

Respond with a single JSON object mapping those keys to strings and nothing else."#,
        first = first_year,
        last = last_year
    );
    let user = format!(
        "Parse this biography into year-by-year entries:\n\n{}",
        biography.trim()
    );
    vec![Message::system(system), Message::user(user)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use diarist_core::records::{ConversationalRecord, Utterance};

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn bucket() -> TimeBucket {
        TimeBucket {
            date: date("2023-01-08"),
            records: vec![ConversationalRecord {
                title: Some("Rust lifetimes".to_string()),
                timestamp: Utc.timestamp_opt(1673150000, 0).unwrap(),
                utterances: vec![
                    Utterance {
                        speaker: Speaker::User,
                        text: "How do lifetimes work?".to_string(),
                    },
                    Utterance {
                        speaker: Speaker::Assistant,
                        text: "x".repeat(40),
                    },
                ],
            }],
        }
    }

    fn builder() -> ContextBuilder {
        let mut diary = DiaryConfig::default();
        diary.max_message_chars = 20;
        diary.context_window = 2;
        let mut background = BackgroundConfig::default();
        background.text = "Grew up by the sea.".to_string();
        background
            .by_year
            .insert("2023".to_string(), "Started a new job.".to_string());
        background
            .by_year
            .insert("2024".to_string(), "Moved abroad.".to_string());
        ContextBuilder::new(diary, background)
    }

    #[test]
    fn test_render_bucket_truncates_and_labels() {
        let text = builder().render_bucket(&bucket());
        assert!(text.starts_with("Topic: Rust lifetimes\n"));
        assert!(text.contains("Me: How do lifetimes work?"));
        assert!(text.contains(&format!("Assistant: {}...", "x".repeat(20))));
    }

    #[test]
    fn test_entry_prompt_background_is_date_aware() {
        let prompt = builder().build_entry_system_prompt(2023);
        assert!(prompt.contains("Grew up by the sea."));
        assert!(prompt.contains("2023: Started a new job."));
        assert!(!prompt.contains("Moved abroad."));
        assert!(prompt.contains(OUTPUT_FORMAT));
    }

    #[test]
    fn test_entry_messages_limit_memory_window() {
        let memory = vec![
            DiaryEntry::new(date("2023-01-05"), "five", "b5"),
            DiaryEntry::new(date("2023-01-06"), "six", "b6"),
            DiaryEntry::new(date("2023-01-07"), "seven", "b7"),
        ];
        let messages = builder().build_entry_messages(&bucket(), &memory);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        let user = &messages[1].content;
        assert!(!user.contains("Title: five"));
        assert!(user.contains("Title: six"));
        assert!(user.contains("Title: seven"));
        assert!(user.contains("Date: 2023-01-08"));
    }

    #[test]
    fn test_entry_messages_without_memory() {
        let messages = builder().build_entry_messages(&bucket(), &[]);
        assert!(!messages[1].content.contains("Recent diary entries"));
    }

    #[test]
    fn test_summary_messages_include_previous_year() {
        let entries = vec![DiaryEntry::new(date("2023-03-01"), "Spring", "Blossoms.")];
        let previous = PeriodSummary::new(2022, "Last year", "Quiet.");
        let messages = builder().build_summary_messages(2023, &entries, Some(&previous));
        assert!(messages[0].content.contains("year 2023"));
        assert!(messages[1].content.contains("Summary of 2022"));
        assert!(messages[1].content.contains("[2023-03-01] Spring"));
    }

    #[test]
    fn test_background_messages_name_range() {
        let messages = build_background_messages("Studied, then worked.", 2021, 2023);
        assert!(messages[0].content.contains("from 2021 to 2023"));
        assert!(messages[1].content.contains("Studied, then worked."));
    }
}
