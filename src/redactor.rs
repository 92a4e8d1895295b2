//! Text transform applied to a suppressed user's messages.
//!
//! Tokens are whitespace-separated. Broadcast tokens and mention markup are
//! always replaced; anything else survives as `*word*` on a coin flip when it
//! is shorter than the word-length limit.

use std::sync::Arc;

use crate::dice::Dice;
use crate::ledger::SuppressionLedger;
use crate::logging::{log, log_swallowed, obj, v_num, Domain, Level};
use crate::ports::is_mention_token;

/// Broadcast markup, matched anywhere inside a token.
const BROADCAST_MARKUP: [&str; 4] = ["<!channel>", "<!here>", "<!channel|", "<!here|"];
/// Typed broadcasts, matched only as a whole token.
const BROADCAST_WORDS: [&str; 2] = ["@channel", "@here"];

fn is_broadcast_token(token: &str) -> bool {
    if BROADCAST_MARKUP.iter().any(|m| token.contains(m)) {
        return true;
    }
    let word = token.trim_end_matches(|c: char| c.is_ascii_punctuation());
    BROADCAST_WORDS.iter().any(|w| word.eq_ignore_ascii_case(w))
}

/// Tokens that must never survive redaction, whatever the dice say.
pub fn is_forced_token(token: &str) -> bool {
    is_broadcast_token(token) || is_mention_token(token)
}

pub fn contains_broadcast(text: &str) -> bool {
    text.split_whitespace().any(is_broadcast_token)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redaction {
    pub output: String,
    pub words_suppressed: u64,
    pub characters_suppressed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageStats {
    pub words: u64,
    pub characters: u64,
}

/// Every token of a deleted message counts as suppressed.
pub fn deletion_stats(text: &str) -> MessageStats {
    text.split_whitespace().fold(MessageStats { words: 0, characters: 0 }, |acc, t| MessageStats {
        words: acc.words + 1,
        characters: acc.characters + t.chars().count() as u64,
    })
}

pub struct MessageRedactor {
    ledger: Arc<dyn SuppressionLedger>,
    dice: Arc<Dice>,
    max_word_length: usize,
    placeholder: String,
}

impl MessageRedactor {
    pub fn new(ledger: Arc<dyn SuppressionLedger>, dice: Arc<Dice>, max_word_length: usize, placeholder: &str) -> Self {
        Self { ledger, dice, max_word_length, placeholder: placeholder.to_string() }
    }

    /// Pure transform; no counters touched.
    pub fn compute(&self, text: &str) -> Redaction {
        let mut words = Vec::new();
        let mut words_suppressed = 0u64;
        let mut characters_suppressed = 0u64;

        for token in text.split_whitespace() {
            let len = token.chars().count();
            let keep = !is_forced_token(token) && len < self.max_word_length && self.dice.coin();
            if keep {
                words.push(format!("*{}*", token));
            } else {
                words_suppressed += 1;
                characters_suppressed += len as u64;
                words.push(self.placeholder.clone());
            }
        }

        Redaction { output: words.join(" "), words_suppressed, characters_suppressed }
    }

    /// Transform and count one message against `record_id`.
    pub fn redact(&self, text: &str, record_id: i64) -> Redaction {
        let redaction = self.compute(text);
        self.count(record_id, redaction.words_suppressed, redaction.characters_suppressed);
        redaction
    }

    /// Count a message that was deleted without a replacement.
    pub fn track_deleted(&self, text: &str, record_id: i64) -> MessageStats {
        let stats = deletion_stats(text);
        self.count(record_id, stats.words, stats.characters);
        stats
    }

    fn count(&self, record_id: i64, words: u64, characters: u64) {
        if let Err(e) = self.ledger.add_statistics(record_id, 1, words, characters) {
            log_swallowed(Domain::Ledger, "add_statistics", &e);
            return;
        }
        log(
            Level::Debug,
            Domain::Redact,
            "counted",
            obj(&[
                ("record_id", v_num(record_id as f64)),
                ("words", v_num(words as f64)),
                ("characters", v_num(characters as f64)),
            ]),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::FixedRolls;
    use crate::ledger::SqliteLedger;
    use crate::model::{NewSuppression, SuppressionKind};

    fn redactor(dice: Dice) -> (MessageRedactor, Arc<SqliteLedger>, i64) {
        let ledger = Arc::new(SqliteLedger::in_memory().unwrap());
        let rec = ledger
            .create(&NewSuppression {
                subject_id: "U1".to_string(),
                team_id: "T1".to_string(),
                kind: SuppressionKind::Muzzle,
                issuer_id: "U2".to_string(),
                duration_ms: 60_000,
            })
            .unwrap();
        (MessageRedactor::new(ledger.clone(), Arc::new(dice), 10, "..mMm.."), ledger, rec.id)
    }

    fn always_keep() -> Dice {
        Dice::fixed(FixedRolls { chance: false, coin: true, offset: 0 })
    }

    #[test]
    fn test_forced_tokens_replaced_even_when_coin_keeps() {
        let (r, _, _) = redactor(always_keep());
        let out = r.compute("hey @channel look <@U9> now");
        assert_eq!(out.output, "*hey* ..mMm.. *look* ..mMm.. *now*");
        assert_eq!(out.words_suppressed, 2);
        assert_eq!(out.characters_suppressed, 8 + 5);
    }

    #[test]
    fn test_long_words_never_kept() {
        let (r, _, _) = redactor(always_keep());
        let out = r.compute("short extraordinarily");
        assert_eq!(out.output, "*short* ..mMm..");
        assert_eq!(out.characters_suppressed, 15);
    }

    #[test]
    fn test_whitespace_collapses_to_single_spaces() {
        let (r, _, _) = redactor(Dice::fixed(FixedRolls { chance: false, coin: false, offset: 0 }));
        let out = r.compute("  a \t b\n c ");
        assert_eq!(out.output, "..mMm.. ..mMm.. ..mMm..");
        assert_eq!(out.words_suppressed, 3);
    }

    #[test]
    fn test_redact_counts_one_message() {
        let (r, ledger, id) = redactor(Dice::fixed(FixedRolls { chance: false, coin: false, offset: 0 }));
        r.redact("one two", id);
        r.redact("three", id);
        let rec = ledger.get(id).unwrap().unwrap();
        assert_eq!(rec.messages_suppressed, 2);
        assert_eq!(rec.words_suppressed, 3);
        assert_eq!(rec.characters_suppressed, 11);
    }

    #[test]
    fn test_track_deleted_counts_every_token() {
        let (r, ledger, id) = redactor(always_keep());
        let stats = r.track_deleted("hello there  friend", id);
        assert_eq!(stats, MessageStats { words: 3, characters: 16 });
        let rec = ledger.get(id).unwrap().unwrap();
        assert_eq!((rec.messages_suppressed, rec.words_suppressed, rec.characters_suppressed), (1, 3, 16));
    }

    #[test]
    fn test_broadcast_detection() {
        assert!(contains_broadcast("ping <!here> pls"));
        assert!(contains_broadcast("ping <!channel|@channel> pls"));
        assert!(contains_broadcast("@channel"));
        assert!(contains_broadcast("look @here!"));
        assert!(!contains_broadcast("channel here"));
    }

    #[test]
    fn test_addresses_are_not_broadcasts() {
        for token in ["ops@here.com", "tv@channel4.com", "@heresy", "@channels"] {
            assert!(!is_forced_token(token), "{} treated as a tag", token);
        }
        assert!(!contains_broadcast("mail ops@here.com please"));

        let (r, _, _) = redactor(always_keep());
        assert_eq!(r.compute("mail a@here.io").output, "*mail* *a@here.io*");
    }
}
