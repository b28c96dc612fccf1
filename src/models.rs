use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Lowercases and drops everything but letters and digits, so
/// "Interview Scheduled", "interview-scheduled" and "InterviewScheduled"
/// all compare equal.
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Lenient date parsing used by import and load paths. Accepts a bare
/// `YYYY-MM-DD` or anything starting with one (e.g. an ISO timestamp).
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("unknown status '{0}'")]
    UnknownStatus(String),
    #[error("unknown platform '{0}'")]
    UnknownPlatform(String),
    #[error("unknown location '{0}'")]
    UnknownLocation(String),
    #[error("unknown CV version '{0}'")]
    UnknownCvVersion(String),
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
}

// Closed label sets with an escape hatch: labels we don't know are kept
// verbatim in `Unknown` so older or newer data survives load and save.
macro_rules! labelled_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident => $label:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Unknown(String),
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn label(&self) -> &str {
                match self {
                    $($name::$variant => $label,)+
                    $name::Unknown(raw) => raw,
                }
            }

            /// Resolves a known label, ignoring case, spacing and punctuation.
            pub fn parse(input: &str) -> Option<Self> {
                let wanted = normalize(input);
                Self::ALL
                    .iter()
                    .find(|known| normalize(known.label()) == wanted)
                    .cloned()
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self::parse(&raw).unwrap_or($name::Unknown(raw))
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.label().to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

labelled_enum!(
    Status {
        Applied => "Applied",
        Screening => "Screening",
        InterviewScheduled => "Interview Scheduled",
        Interviewed => "Interviewed",
        TechnicalTest => "Technical Test",
        Offer => "Offer",
        Rejected => "Rejected",
        Withdrawn => "Withdrawn",
        FollowUpNeeded => "Follow-up Needed",
    }
);

labelled_enum!(
    Platform {
        LinkedIn => "LinkedIn",
        Upwork => "Upwork",
        Indeed => "Indeed",
        CompanyWebsite => "Company Website",
        Referral => "Referral",
        RecruiterContact => "Recruiter Contact",
        Other => "Other",
    }
);

labelled_enum!(
    Location {
        Remote => "Remote",
        Hybrid => "Hybrid",
        OnSiteLagos => "On-site - Lagos",
        OnSiteIbadan => "On-site - Ibadan",
        OnSiteAbuja => "On-site - Abuja",
        InternationalRemote => "International Remote",
        Other => "Other",
    }
);

labelled_enum!(
    CvVersion {
        Support => "Support",
        Infrastructure => "Infrastructure",
        Custom => "Custom",
    }
);

impl Default for Status {
    fn default() -> Self {
        Status::Applied
    }
}

impl Status {
    /// Rejected, withdrawn and offered applications never need a follow-up.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Rejected | Status::Withdrawn | Status::Offer)
    }

    /// Anything past the initial submission that isn't a dead end counts as
    /// a response from the employer.
    pub fn is_response(&self) -> bool {
        !matches!(self, Status::Applied | Status::Rejected | Status::Withdrawn)
    }
}

static DEFAULT_PLATFORM: Platform = Platform::LinkedIn;

/// One tracked job application.
///
/// Optional fields stay `None` in storage; defaults such as the LinkedIn
/// platform are resolved by accessors at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: i64,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub position: String,
    #[serde(default, with = "optional_label")]
    pub location: Option<Location>,
    #[serde(default, with = "optional_label")]
    pub platform: Option<Platform>,
    #[serde(default, with = "optional_date")]
    pub date_applied: Option<NaiveDate>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub salary: String,
    #[serde(default)]
    pub job_url: String,
    #[serde(default)]
    pub contact_person: String,
    #[serde(default, with = "optional_label")]
    pub cv_version: Option<CvVersion>,
    #[serde(default, with = "optional_date")]
    pub follow_up_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, with = "optional_date")]
    pub last_update: Option<NaiveDate>,
}

impl Application {
    /// A blank entry with today's dates, `Applied` status, LinkedIn and the
    /// Support CV. Carries id 0 until the store accepts it.
    pub fn draft(today: NaiveDate) -> Self {
        Self {
            id: 0,
            company: String::new(),
            position: String::new(),
            location: None,
            platform: Some(Platform::LinkedIn),
            date_applied: Some(today),
            status: Status::Applied,
            salary: String::new(),
            job_url: String::new(),
            contact_person: String::new(),
            cv_version: Some(CvVersion::Support),
            follow_up_date: None,
            notes: String::new(),
            last_update: Some(today),
        }
    }

    pub fn is_creatable(&self) -> bool {
        !self.company.trim().is_empty() && !self.position.trim().is_empty()
    }

    pub fn platform_or_default(&self) -> &Platform {
        self.platform.as_ref().unwrap_or(&DEFAULT_PLATFORM)
    }

    pub fn is_follow_up_due(&self, today: NaiveDate) -> bool {
        match self.follow_up_date {
            Some(date) => date <= today && !self.status.is_terminal(),
            None => false,
        }
    }

    /// Moves `last_update` to `today`, never backwards.
    pub fn stamp(&mut self, today: NaiveDate) {
        self.last_update = Some(match self.last_update {
            Some(previous) if previous > today => previous,
            _ => today,
        });
    }

    /// Replaces one user-editable field from its text form. Enumerated
    /// fields only accept known labels; empty text clears optional fields.
    pub fn set_field(&mut self, field: Field, value: &str) -> Result<(), ValueError> {
        let trimmed = value.trim();
        match field {
            Field::Company => self.company = value.to_string(),
            Field::Position => self.position = value.to_string(),
            Field::Salary => self.salary = value.to_string(),
            Field::JobUrl => self.job_url = value.to_string(),
            Field::ContactPerson => self.contact_person = value.to_string(),
            Field::Notes => self.notes = value.to_string(),
            Field::Status => {
                self.status = Status::parse(trimmed)
                    .ok_or_else(|| ValueError::UnknownStatus(trimmed.to_string()))?;
            }
            Field::Platform => {
                self.platform = optional(trimmed, Platform::parse, ValueError::UnknownPlatform)?;
            }
            Field::Location => {
                self.location = optional(trimmed, Location::parse, ValueError::UnknownLocation)?;
            }
            Field::CvVersion => {
                self.cv_version = optional(trimmed, CvVersion::parse, ValueError::UnknownCvVersion)?;
            }
            Field::DateApplied => self.date_applied = strict_date(trimmed)?,
            Field::FollowUpDate => self.follow_up_date = strict_date(trimmed)?,
        }
        Ok(())
    }

    pub fn field_value(&self, field: Field) -> String {
        fn label<T: std::fmt::Display>(value: &Option<T>) -> String {
            value.as_ref().map(ToString::to_string).unwrap_or_default()
        }

        match field {
            Field::Company => self.company.clone(),
            Field::Position => self.position.clone(),
            Field::Location => label(&self.location),
            Field::Platform => label(&self.platform),
            Field::DateApplied => format_date(self.date_applied),
            Field::Status => self.status.to_string(),
            Field::Salary => self.salary.clone(),
            Field::JobUrl => self.job_url.clone(),
            Field::ContactPerson => self.contact_person.clone(),
            Field::CvVersion => label(&self.cv_version),
            Field::FollowUpDate => format_date(self.follow_up_date),
            Field::Notes => self.notes.clone(),
        }
    }
}

fn optional<T>(
    input: &str,
    parse: fn(&str) -> Option<T>,
    unknown: fn(String) -> ValueError,
) -> Result<Option<T>, ValueError> {
    if input.is_empty() {
        return Ok(None);
    }
    parse(input).map(Some).ok_or_else(|| unknown(input.to_string()))
}

fn strict_date(input: &str) -> Result<Option<NaiveDate>, ValueError> {
    if input.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| ValueError::InvalidDate(input.to_string()))
}

/// User-editable fields. `lastUpdate` is deliberately absent: it is only
/// ever stamped by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Company,
    Position,
    Location,
    Platform,
    DateApplied,
    Status,
    Salary,
    JobUrl,
    ContactPerson,
    CvVersion,
    FollowUpDate,
    Notes,
}

impl Field {
    pub const ALL: [Field; 12] = [
        Field::Company,
        Field::Position,
        Field::Location,
        Field::Platform,
        Field::DateApplied,
        Field::Status,
        Field::Salary,
        Field::JobUrl,
        Field::ContactPerson,
        Field::CvVersion,
        Field::FollowUpDate,
        Field::Notes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Field::Company => "company",
            Field::Position => "position",
            Field::Location => "location",
            Field::Platform => "platform",
            Field::DateApplied => "dateApplied",
            Field::Status => "status",
            Field::Salary => "salary",
            Field::JobUrl => "jobUrl",
            Field::ContactPerson => "contactPerson",
            Field::CvVersion => "cvVersion",
            Field::FollowUpDate => "followUpDate",
            Field::Notes => "notes",
        }
    }
}

impl std::str::FromStr for Field {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        Field::ALL
            .into_iter()
            .find(|field| normalize(field.name()) == wanted)
            .ok_or_else(|| ValueError::UnknownField(s.to_string()))
    }
}

// Ids written by older sessions may be floats or strings; anything that
// isn't a usable integer becomes 0 and is reassigned on load.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Int(id) => id,
        RawId::Float(id) if id.fract() == 0.0 && id.is_finite() => id as i64,
        RawId::Float(_) => 0,
        RawId::Text(text) => text.trim().parse().unwrap_or(0),
    })
}

mod optional_label {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Clone + Into<String>,
    {
        match value {
            Some(inner) => serializer.serialize_str(&inner.clone().into()),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: From<String>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(T::from))
    }
}

mod optional_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(super::parse_date))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_draft_defaults() {
        let draft = Application::draft(day("2024-10-20"));
        assert_eq!(draft.status, Status::Applied);
        assert_eq!(draft.platform, Some(Platform::LinkedIn));
        assert_eq!(draft.cv_version, Some(CvVersion::Support));
        assert_eq!(draft.date_applied, Some(day("2024-10-20")));
        assert_eq!(draft.last_update, Some(day("2024-10-20")));
        assert!(draft.follow_up_date.is_none());
        assert!(!draft.is_creatable());
    }

    #[test]
    fn test_creatable_requires_company_and_position() {
        let mut draft = Application::draft(day("2024-10-20"));
        draft.company = "Acme".to_string();
        draft.position = "   ".to_string();
        assert!(!draft.is_creatable());

        draft.position = "Cloud Engineer".to_string();
        assert!(draft.is_creatable());
    }

    #[test]
    fn test_label_parsing_is_forgiving() {
        assert_eq!(Status::parse("interview scheduled"), Some(Status::InterviewScheduled));
        assert_eq!(Status::parse("InterviewScheduled"), Some(Status::InterviewScheduled));
        assert_eq!(Status::parse("follow-up needed"), Some(Status::FollowUpNeeded));
        assert_eq!(Location::parse("OnSiteLagos"), Some(Location::OnSiteLagos));
        assert_eq!(Platform::parse("company website"), Some(Platform::CompanyWebsite));
        assert_eq!(Status::parse("Ghosted"), None);
    }

    #[test]
    fn test_unknown_labels_survive_deserialization() {
        let status: Status = serde_json::from_str("\"Ghosted\"").unwrap();
        assert_eq!(status, Status::Unknown("Ghosted".to_string()));
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"Ghosted\"");
    }

    #[test]
    fn test_missing_platform_reads_as_linkedin() {
        let json = r#"{"id": 1, "company": "Acme", "position": "SRE", "status": "Applied"}"#;
        let app: Application = serde_json::from_str(json).unwrap();
        assert!(app.platform.is_none());
        assert_eq!(app.platform_or_default(), &Platform::LinkedIn);
    }

    #[test]
    fn test_blank_strings_load_as_unset() {
        let json = r#"{
            "id": 1729382400000,
            "company": "Example Tech",
            "position": "Azure Support Engineer",
            "location": "",
            "dateApplied": "2024-10-20",
            "status": "Applied",
            "followUpDate": "",
            "lastUpdate": "2024-10-20T09:00:00.000Z"
        }"#;
        let app: Application = serde_json::from_str(json).unwrap();
        assert!(app.location.is_none());
        assert!(app.follow_up_date.is_none());
        assert_eq!(app.last_update, Some(day("2024-10-20")));
    }

    #[test]
    fn test_fractional_ids_are_zeroed_for_reassignment() {
        let app: Application = serde_json::from_str(r#"{"id": 1729382400000.25}"#).unwrap();
        assert_eq!(app.id, 0);
        let app: Application = serde_json::from_str(r#"{"id": "42"}"#).unwrap();
        assert_eq!(app.id, 42);
    }

    #[test]
    fn test_follow_up_due() {
        let today = day("2024-11-03");
        let mut app = Application::draft(day("2024-10-20"));
        assert!(!app.is_follow_up_due(today));

        app.follow_up_date = Some(day("2024-11-02"));
        assert!(app.is_follow_up_due(today));

        app.follow_up_date = Some(today);
        assert!(app.is_follow_up_due(today));

        app.status = Status::Offer;
        assert!(!app.is_follow_up_due(today));

        app.status = Status::Screening;
        app.follow_up_date = Some(day("2024-11-04"));
        assert!(!app.is_follow_up_due(today));
    }

    #[test]
    fn test_stamp_never_moves_backwards() {
        let mut app = Application::draft(day("2024-10-20"));
        app.stamp(day("2024-10-25"));
        assert_eq!(app.last_update, Some(day("2024-10-25")));
        app.stamp(day("2024-10-21"));
        assert_eq!(app.last_update, Some(day("2024-10-25")));
    }

    #[test]
    fn test_set_field_parses_values() {
        let mut app = Application::draft(day("2024-10-20"));
        app.set_field(Field::Status, "technical test").unwrap();
        assert_eq!(app.status, Status::TechnicalTest);

        app.set_field(Field::FollowUpDate, "2024-11-01").unwrap();
        assert_eq!(app.follow_up_date, Some(day("2024-11-01")));

        app.set_field(Field::FollowUpDate, "").unwrap();
        assert!(app.follow_up_date.is_none());

        app.set_field(Field::Location, "hybrid").unwrap();
        assert_eq!(app.location, Some(Location::Hybrid));
    }

    #[test]
    fn test_set_field_rejects_unknown_labels() {
        let mut app = Application::draft(day("2024-10-20"));
        assert_eq!(
            app.set_field(Field::Status, "Ghosted"),
            Err(ValueError::UnknownStatus("Ghosted".to_string()))
        );
        assert_eq!(app.status, Status::Applied);

        assert_eq!(
            app.set_field(Field::DateApplied, "20/10/2024"),
            Err(ValueError::InvalidDate("20/10/2024".to_string()))
        );
    }

    #[test]
    fn test_field_names_parse() {
        assert_eq!("dateApplied".parse::<Field>(), Ok(Field::DateApplied));
        assert_eq!("date-applied".parse::<Field>(), Ok(Field::DateApplied));
        assert_eq!("Follow-up Date".parse::<Field>(), Ok(Field::FollowUpDate));
        assert_eq!("job_url".parse::<Field>(), Ok(Field::JobUrl));
        assert!("lastUpdate".parse::<Field>().is_err());
    }
}
