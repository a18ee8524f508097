//! The outcome vocabulary offered after a call, email or meeting.
//!
//! This table is product configuration. The classifier only applies the entry
//! the user picked; it never chooses one.

use serde::Serialize;

use super::{InteractionType, Stage};

string_enum!(Outcome {
    NoAnswer => "no_answer",
    Voicemail => "voicemail",
    Callback => "callback",
    WrongNumber => "wrong_number",
    EmailSent => "email_sent",
    EmailOpened => "email_opened",
    EmailReplied => "email_replied",
    Interested => "interested",
    FollowUpNeeded => "follow_up_needed",
    MeetingBooked => "meeting_booked",
    ProposalSent => "proposal_sent",
    SaleMade => "sale_made",
    NotInterested => "not_interested",
    DoNotContact => "do_not_contact",
    NoChange => "no_change",
});

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSpec {
    pub outcome: Outcome,
    pub label: &'static str,
    pub valid_for: &'static [InteractionType],
    pub stage: Option<Stage>,
}

const CALL_ONLY: &[InteractionType] = &[InteractionType::Call];
const EMAIL_ONLY: &[InteractionType] = &[InteractionType::Email];
const ANY: &[InteractionType] = &[
    InteractionType::Call,
    InteractionType::Email,
    InteractionType::Meeting,
    InteractionType::Other,
];

pub const OUTCOMES: &[OutcomeSpec] = &[
    OutcomeSpec { outcome: Outcome::NoAnswer, label: "No Answer", valid_for: CALL_ONLY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::Voicemail, label: "Left Voicemail", valid_for: CALL_ONLY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::Callback, label: "Callback Requested", valid_for: CALL_ONLY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::WrongNumber, label: "Wrong Number", valid_for: CALL_ONLY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::EmailSent, label: "Email Sent", valid_for: EMAIL_ONLY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::EmailOpened, label: "Email Opened", valid_for: EMAIL_ONLY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::EmailReplied, label: "Email Replied", valid_for: EMAIL_ONLY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::Interested, label: "Interested", valid_for: ANY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::FollowUpNeeded, label: "Follow-up Needed", valid_for: ANY, stage: Some(Stage::Contacted) },
    OutcomeSpec { outcome: Outcome::MeetingBooked, label: "Meeting Booked", valid_for: ANY, stage: Some(Stage::Meeting) },
    OutcomeSpec { outcome: Outcome::ProposalSent, label: "Proposal Sent", valid_for: ANY, stage: Some(Stage::Proposal) },
    OutcomeSpec { outcome: Outcome::SaleMade, label: "Sale Made", valid_for: ANY, stage: Some(Stage::Won) },
    OutcomeSpec { outcome: Outcome::NotInterested, label: "Not Interested", valid_for: ANY, stage: Some(Stage::Lost) },
    OutcomeSpec { outcome: Outcome::DoNotContact, label: "Do Not Contact", valid_for: ANY, stage: Some(Stage::Lost) },
    OutcomeSpec { outcome: Outcome::NoChange, label: "Logged (No Stage Change)", valid_for: ANY, stage: None },
];

impl Outcome {
    pub fn spec(&self) -> &'static OutcomeSpec {
        // Every variant has exactly one row; see `table_covers_every_outcome_once`.
        OUTCOMES
            .iter()
            .find(|spec| spec.outcome == *self)
            .unwrap_or(&OUTCOMES[OUTCOMES.len() - 1])
    }

    pub fn label(&self) -> &'static str {
        self.spec().label
    }

    pub fn target_stage(&self) -> Option<Stage> {
        self.spec().stage
    }

    pub fn is_valid_for(&self, interaction: InteractionType) -> bool {
        self.spec().valid_for.contains(&interaction)
    }
}

/// Outcomes the UI may offer for an interaction type, in table order.
pub fn outcomes_for(interaction: InteractionType) -> Vec<&'static OutcomeSpec> {
    OUTCOMES
        .iter()
        .filter(|spec| spec.valid_for.contains(&interaction))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_outcome_once() {
        for outcome in Outcome::ALL {
            let rows = OUTCOMES.iter().filter(|s| s.outcome == *outcome).count();
            assert_eq!(rows, 1, "{} should appear exactly once", outcome);
        }
        assert_eq!(OUTCOMES.len(), Outcome::ALL.len());
    }

    #[test]
    fn every_interaction_type_has_outcomes() {
        for interaction in InteractionType::ALL {
            assert!(
                !outcomes_for(*interaction).is_empty(),
                "{} has no outcomes",
                interaction
            );
        }
    }

    #[test]
    fn call_only_outcomes_are_not_offered_for_email() {
        let email: Vec<Outcome> = outcomes_for(InteractionType::Email)
            .iter()
            .map(|s| s.outcome)
            .collect();
        assert!(!email.contains(&Outcome::Voicemail));
        assert!(!email.contains(&Outcome::NoAnswer));
        assert!(email.contains(&Outcome::EmailReplied));
        assert!(!Outcome::EmailSent.is_valid_for(InteractionType::Call));
    }

    #[test]
    fn stage_mapping_matches_pipeline() {
        assert_eq!(Outcome::MeetingBooked.target_stage(), Some(Stage::Meeting));
        assert_eq!(Outcome::ProposalSent.target_stage(), Some(Stage::Proposal));
        assert_eq!(Outcome::SaleMade.target_stage(), Some(Stage::Won));
        assert_eq!(Outcome::DoNotContact.target_stage(), Some(Stage::Lost));
        assert_eq!(Outcome::WrongNumber.target_stage(), Some(Stage::Contacted));
        assert_eq!(Outcome::NoChange.target_stage(), None);
    }

    #[test]
    fn outcome_round_trips_through_its_tag() {
        assert_eq!("follow_up_needed".parse::<Outcome>(), Ok(Outcome::FollowUpNeeded));
        assert!("maybe".parse::<Outcome>().is_err());
    }
}
