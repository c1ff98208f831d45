use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::record::{StudyRecord, StudyStatus};

/// Sentinel value of the doctor view's center selector.
pub const ALL_CENTERS_DOCTOR: &str = "ALL";
/// Sentinel value of the institute view's center selector.
pub const ALL_CENTERS_INSTITUTE: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(StudyStatus),
}

impl StatusFilter {
    pub fn matches(self, status: StudyStatus) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Only(wanted) => wanted == status,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StatusFilter::All => "All",
            StatusFilter::Only(status) => status.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CenterFilter {
    #[default]
    All,
    Only(String),
}

impl CenterFilter {
    /// Maps a selector value to a filter, treating either sentinel as "all".
    pub fn from_selection(value: &str) -> Self {
        if value.is_empty() || value == ALL_CENTERS_DOCTOR || value == ALL_CENTERS_INSTITUTE {
            CenterFilter::All
        } else {
            CenterFilter::Only(value.to_string())
        }
    }

    pub fn selected(&self) -> Option<&str> {
        match self {
            CenterFilter::All => None,
            CenterFilter::Only(center) => Some(center),
        }
    }
}

/// Which record attributes a center selection is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CenterScope {
    CenterOrInstitute,
    CenterOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StudyFilter {
    pub name: String,
    pub patient_id: String,
    pub status: StatusFilter,
    pub center: CenterFilter,
    /// Keep only emergency studies when set. Unset never excludes anything.
    pub emergency_only: bool,
    pub modalities: BTreeSet<String>,
    pub scan_from: Option<NaiveDate>,
    pub scan_to: Option<NaiveDate>,
}

impl StudyFilter {
    pub fn is_default(&self) -> bool {
        *self == StudyFilter::default()
    }

    /// Returns the matching records in their original relative order.
    pub fn apply<'a>(&self, records: &'a [StudyRecord], scope: CenterScope) -> Vec<&'a StudyRecord> {
        let matcher = self.matcher(scope);
        records.iter().filter(|record| matcher.matches(record)).collect()
    }

    fn matcher(&self, scope: CenterScope) -> Matcher<'_> {
        Matcher {
            filter: self,
            scope,
            name: self.name.trim().to_lowercase(),
            patient_id: self.patient_id.trim().to_lowercase(),
            from: self.scan_from.map(|day| day.and_time(NaiveTime::MIN)),
            to: self.scan_to.and_then(|day| day.and_hms_opt(23, 59, 59)),
        }
    }
}

struct Matcher<'a> {
    filter: &'a StudyFilter,
    scope: CenterScope,
    name: String,
    patient_id: String,
    from: Option<NaiveDateTime>,
    to: Option<NaiveDateTime>,
}

impl Matcher<'_> {
    fn matches(&self, record: &StudyRecord) -> bool {
        let filter = self.filter;
        if filter.emergency_only && !record.is_emergency {
            return false;
        }
        if !filter.status.matches(record.status) {
            return false;
        }
        if let CenterFilter::Only(center) = &filter.center {
            let hit = match self.scope {
                CenterScope::CenterOrInstitute => {
                    record.center == *center || record.institute_name == *center
                }
                CenterScope::CenterOnly => record.center == *center,
            };
            if !hit {
                return false;
            }
        }
        if !self.name.is_empty() && !record.patient_name.to_lowercase().contains(&self.name) {
            return false;
        }
        if !self.patient_id.is_empty()
            && !record.patient_id.to_lowercase().contains(&self.patient_id)
        {
            return false;
        }
        if !filter.modalities.is_empty() && !filter.modalities.contains(&record.modality) {
            return false;
        }
        if self.from.is_some() || self.to.is_some() {
            // Records without a usable scan time cannot satisfy a bound.
            let Some(scanned) = record.scanned_at.map(|at| at.as_datetime()) else {
                return false;
            };
            if self.from.is_some_and(|from| scanned < from) {
                return false;
            }
            if self.to.is_some_and(|to| scanned > to) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CenterOption {
    pub value: String,
    pub label: String,
}

/// Center selector entries for the doctor view, derived from the loaded
/// records: one entry per institute (sorted), valued by the first center
/// seen for it, behind a leading "All Centers" entry.
pub fn doctor_center_options(records: &[StudyRecord]) -> Vec<CenterOption> {
    let mut institutes = Vec::<(String, String)>::new();
    for record in records {
        if record.institute_name.is_empty() {
            continue;
        }
        if institutes.iter().all(|(name, _)| *name != record.institute_name) {
            institutes.push((record.institute_name.clone(), record.center.clone()));
        }
    }
    institutes.sort_by(|a, b| a.0.cmp(&b.0));

    let mut options = vec![CenterOption {
        value: ALL_CENTERS_DOCTOR.to_string(),
        label: "All Centers".to_string(),
    }];
    options.extend(
        institutes
            .into_iter()
            .map(|(label, value)| CenterOption { value, label }),
    );
    options
}

/// Center selector entries for the institute view.
pub fn institute_center_options<'a>(centers: impl IntoIterator<Item = &'a str>) -> Vec<CenterOption> {
    let mut options = vec![CenterOption {
        value: ALL_CENTERS_INSTITUTE.to_string(),
        label: "All Centers".to_string(),
    }];
    options.extend(centers.into_iter().map(|name| CenterOption {
        value: name.to_string(),
        label: name.to_string(),
    }));
    options
}

/// Keeps `current` when the refreshed option list still offers it.
pub fn retain_center_selection(current: &CenterFilter, options: &[CenterOption]) -> CenterFilter {
    match current {
        CenterFilter::Only(value) if options.iter().any(|option| option.value == *value) => {
            current.clone()
        }
        _ => CenterFilter::All,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ScanTime;

    fn study(id: i64) -> StudyRecord {
        StudyRecord {
            id,
            patient_name: format!("Patient {id}"),
            patient_id: format!("P{id}"),
            age: 40,
            sex: "F".to_string(),
            body_part: "CHEST".to_string(),
            modality: "CT".to_string(),
            center: "North".to_string(),
            institute_name: "City Imaging".to_string(),
            scanned_at: None,
            status: StudyStatus::Unreported,
            is_emergency: false,
            study_uid: None,
            report_url: None,
            dicom_file_url: None,
            reported_by: String::new(),
            assigned_doctors: String::new(),
            image_refs: Vec::new(),
            thumbnail_url: None,
        }
    }

    fn ids(records: &[&StudyRecord]) -> Vec<i64> {
        records.iter().map(|record| record.id).collect()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn default_filter_keeps_everything_in_order() {
        let records = (1..=5).rev().map(study).collect::<Vec<_>>();
        let filter = StudyFilter::default();
        assert!(filter.is_default());
        assert_eq!(ids(&filter.apply(&records, CenterScope::CenterOrInstitute)), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn predicates_combine_and_preserve_order() {
        let mut records = (1..=6).map(study).collect::<Vec<_>>();
        records[1].modality = "MR".to_string();
        records[3].modality = "MR".to_string();
        records[3].status = StudyStatus::Reported;
        records[5].modality = "MR".to_string();
        records[5].status = StudyStatus::Reported;

        let filter = StudyFilter {
            status: StatusFilter::Only(StudyStatus::Reported),
            modalities: BTreeSet::from(["MR".to_string()]),
            ..StudyFilter::default()
        };
        assert_eq!(ids(&filter.apply(&records, CenterScope::CenterOnly)), vec![4, 6]);
    }

    #[test]
    fn name_and_id_match_case_insensitive_substrings() {
        let mut records = vec![study(1), study(2), study(3)];
        records[0].patient_name = "Jane DOE".to_string();
        records[1].patient_name = "John Smith".to_string();
        records[2].patient_id = "ab-77".to_string();

        let by_name = StudyFilter { name: "doe".to_string(), ..StudyFilter::default() };
        assert_eq!(ids(&by_name.apply(&records, CenterScope::CenterOnly)), vec![1]);

        let by_id = StudyFilter { patient_id: "AB-7".to_string(), ..StudyFilter::default() };
        assert_eq!(ids(&by_id.apply(&records, CenterScope::CenterOnly)), vec![3]);
    }

    #[test]
    fn status_match_is_exact() {
        let mut records = vec![study(1), study(2), study(3)];
        records[0].status = StudyStatus::Reported;
        records[1].status = StudyStatus::Unreported;
        records[2].status = StudyStatus::Reviewed;

        let filter = StudyFilter {
            status: StatusFilter::Only(StudyStatus::Reported),
            ..StudyFilter::default()
        };
        assert_eq!(ids(&filter.apply(&records, CenterScope::CenterOnly)), vec![1]);
    }

    #[test]
    fn emergency_flag_only_narrows() {
        let records = (1..=10).map(study).collect::<Vec<_>>();
        let unchecked = StudyFilter::default();
        assert_eq!(unchecked.apply(&records, CenterScope::CenterOnly).len(), 10);

        let checked = StudyFilter { emergency_only: true, ..StudyFilter::default() };
        assert!(checked.apply(&records, CenterScope::CenterOnly).is_empty());

        let mut mixed = records.clone();
        mixed[2].is_emergency = true;
        assert_eq!(ids(&checked.apply(&mixed, CenterScope::CenterOnly)), vec![3]);
        assert_eq!(unchecked.apply(&mixed, CenterScope::CenterOnly).len(), 10);
    }

    #[test]
    fn center_scope_controls_institute_matching() {
        let mut records = vec![study(1), study(2)];
        records[1].center = "South".to_string();
        records[1].institute_name = "Harbor Clinic".to_string();

        let filter = StudyFilter {
            center: CenterFilter::from_selection("Harbor Clinic"),
            ..StudyFilter::default()
        };
        assert_eq!(ids(&filter.apply(&records, CenterScope::CenterOrInstitute)), vec![2]);
        assert!(filter.apply(&records, CenterScope::CenterOnly).is_empty());

        assert_eq!(CenterFilter::from_selection("ALL"), CenterFilter::All);
        assert_eq!(CenterFilter::from_selection("All"), CenterFilter::All);
    }

    #[test]
    fn date_range_is_inclusive_of_whole_days() {
        let mut records = vec![study(1), study(2), study(3), study(4)];
        records[0].scanned_at = Some(ScanTime::At(day(2024, 1, 15).and_hms_opt(9, 30, 0).expect("valid time")));
        records[1].scanned_at = Some(ScanTime::Day(day(2024, 2, 1)));
        records[2].scanned_at = Some(ScanTime::At(day(2024, 1, 31).and_hms_opt(23, 59, 59).expect("valid time")));

        let filter = StudyFilter {
            scan_from: Some(day(2024, 1, 1)),
            scan_to: Some(day(2024, 1, 31)),
            ..StudyFilter::default()
        };
        assert_eq!(ids(&filter.apply(&records, CenterScope::CenterOnly)), vec![1, 3]);
    }

    #[test]
    fn undated_records_drop_out_once_a_bound_is_set() {
        let mut records = vec![study(1), study(2)];
        records[0].scanned_at = Some(ScanTime::Day(day(2024, 3, 3)));

        let only_start = StudyFilter { scan_from: Some(day(2024, 1, 1)), ..StudyFilter::default() };
        assert_eq!(ids(&only_start.apply(&records, CenterScope::CenterOnly)), vec![1]);

        let no_bounds = StudyFilter::default();
        assert_eq!(no_bounds.apply(&records, CenterScope::CenterOnly).len(), 2);
    }

    #[test]
    fn doctor_center_options_are_sorted_by_institute() {
        let mut records = vec![study(1), study(2), study(3)];
        records[0].institute_name = "Zeta".to_string();
        records[0].center = "Z1".to_string();
        records[1].institute_name = "Alpha".to_string();
        records[1].center = "A1".to_string();
        records[2].institute_name = "Alpha".to_string();
        records[2].center = "A2".to_string();

        let options = doctor_center_options(&records);
        let pairs = options
            .iter()
            .map(|option| (option.value.as_str(), option.label.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("ALL", "All Centers"), ("A1", "Alpha"), ("Z1", "Zeta")]);

        let kept = retain_center_selection(&CenterFilter::Only("A1".to_string()), &options);
        assert_eq!(kept, CenterFilter::Only("A1".to_string()));
        let dropped = retain_center_selection(&CenterFilter::Only("A2".to_string()), &options);
        assert_eq!(dropped, CenterFilter::All);
    }
}
