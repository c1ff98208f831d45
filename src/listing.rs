use crate::filter::{CenterScope, StudyFilter};
use crate::paginate::{Pager, DEFAULT_PAGE_SIZE};
use crate::record::StudyRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Filtered studies paginate as-is, in fetch order.
    Flat,
    /// Filtered studies are grouped per patient; groups paginate, most
    /// recent (highest study id) first.
    ByPatient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingConfig {
    pub grouping: Grouping,
    pub center_scope: CenterScope,
    pub page_size: usize,
}

impl ListingConfig {
    pub fn doctor() -> Self {
        Self {
            grouping: Grouping::Flat,
            center_scope: CenterScope::CenterOrInstitute,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn institute() -> Self {
        Self {
            grouping: Grouping::ByPatient,
            center_scope: CenterScope::CenterOnly,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientGroup {
    pub patient_id: String,
    pub images: Vec<StudyRecord>,
    pub max_id: i64,
}

impl PatientGroup {
    /// The study shown for the group: the one carrying `max_id`, else the first.
    pub fn representative(&self) -> Option<&StudyRecord> {
        self.images
            .iter()
            .find(|image| image.id == self.max_id)
            .or_else(|| self.images.first())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListEntry {
    Study(StudyRecord),
    Patient(PatientGroup),
}

impl ListEntry {
    pub fn representative(&self) -> Option<&StudyRecord> {
        match self {
            ListEntry::Study(study) => Some(study),
            ListEntry::Patient(group) => group.representative(),
        }
    }

    pub fn study_count(&self) -> usize {
        match self {
            ListEntry::Study(_) => 1,
            ListEntry::Patient(group) => group.images.len(),
        }
    }
}

/// Groups studies by patient id (empty ids share the "Unknown" bucket) and
/// orders the groups by descending `max_id`. Ties keep first-seen order.
pub fn group_by_patient<'a>(studies: impl IntoIterator<Item = &'a StudyRecord>) -> Vec<PatientGroup> {
    let mut groups = Vec::<PatientGroup>::new();
    for study in studies {
        let key = if study.patient_id.is_empty() {
            "Unknown"
        } else {
            study.patient_id.as_str()
        };
        match groups.iter_mut().find(|group| group.patient_id == key) {
            Some(group) => {
                group.max_id = group.max_id.max(study.id);
                group.images.push(study.clone());
            }
            None => groups.push(PatientGroup {
                patient_id: key.to_string(),
                images: vec![study.clone()],
                max_id: study.id,
            }),
        }
    }
    groups.sort_by(|a, b| b.max_id.cmp(&a.max_id));
    groups
}

/// The full record set of one dashboard plus everything derived from it.
///
/// Records are replaced wholesale on each fetch; entries and the page
/// window are recomputed synchronously from records, filter and page.
#[derive(Debug, Clone)]
pub struct Listing {
    config: ListingConfig,
    records: Vec<StudyRecord>,
    filter: StudyFilter,
    entries: Vec<ListEntry>,
    pager: Pager,
}

impl Listing {
    pub fn new(config: ListingConfig, initial_page: usize) -> Self {
        Self {
            config,
            records: Vec::new(),
            filter: StudyFilter::default(),
            entries: Vec::new(),
            pager: Pager::new(config.page_size, initial_page),
        }
    }

    pub fn config(&self) -> ListingConfig {
        self.config
    }

    pub fn records(&self) -> &[StudyRecord] {
        &self.records
    }

    pub fn filter(&self) -> &StudyFilter {
        &self.filter
    }

    pub fn entries(&self) -> &[ListEntry] {
        &self.entries
    }

    pub fn pager(&self) -> &Pager {
        &self.pager
    }

    pub fn current_page(&self) -> usize {
        self.pager.current()
    }

    pub fn page_entries(&self) -> &[ListEntry] {
        self.pager.slice(&self.entries)
    }

    pub fn replace_records(&mut self, records: Vec<StudyRecord>, maintain_page: bool) {
        self.records = records;
        self.refilter(maintain_page);
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.entries.clear();
        self.pager.reset_for(0, true);
    }

    /// A filter edit always sends the user back to page 1.
    pub fn set_filter(&mut self, filter: StudyFilter) {
        self.replace_filter(filter, false);
    }

    pub fn replace_filter(&mut self, filter: StudyFilter, maintain_page: bool) {
        self.filter = filter;
        self.refilter(maintain_page);
    }

    pub fn refilter(&mut self, maintain_page: bool) {
        let matched = self.filter.apply(&self.records, self.config.center_scope);
        self.entries = match self.config.grouping {
            Grouping::Flat => matched.into_iter().cloned().map(ListEntry::Study).collect(),
            Grouping::ByPatient => group_by_patient(matched)
                .into_iter()
                .map(ListEntry::Patient)
                .collect(),
        };
        self.pager.reset_for(self.entries.len(), maintain_page);
    }

    pub fn go_to_page(&mut self, page: usize) -> bool {
        self.pager.go_to(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::StatusFilter;
    use crate::record::StudyStatus;

    fn study(id: i64, patient_id: &str) -> StudyRecord {
        StudyRecord {
            id,
            patient_name: format!("Patient {patient_id}"),
            patient_id: patient_id.to_string(),
            age: 0,
            sex: String::new(),
            body_part: String::new(),
            modality: "CT".to_string(),
            center: "North".to_string(),
            institute_name: "City Imaging".to_string(),
            scanned_at: None,
            status: StudyStatus::NotAssigned,
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

    fn entry_ids(entries: &[ListEntry]) -> Vec<i64> {
        entries
            .iter()
            .filter_map(ListEntry::representative)
            .map(|record| record.id)
            .collect()
    }

    #[test]
    fn groups_order_by_highest_study_id() {
        let studies = vec![study(5, "P1"), study(3, "P2"), study(9, "P1")];
        let groups = group_by_patient(&studies);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].patient_id, "P1");
        assert_eq!(groups[0].max_id, 9);
        assert_eq!(groups[0].images.len(), 2);
        assert_eq!(groups[0].representative().map(|r| r.id), Some(9));
        assert_eq!(groups[1].patient_id, "P2");
        assert_eq!(groups[1].max_id, 3);
    }

    #[test]
    fn empty_patient_ids_share_a_bucket() {
        let studies = vec![study(1, ""), study(2, "")];
        let groups = group_by_patient(&studies);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].patient_id, "Unknown");
    }

    #[test]
    fn doctor_listing_keeps_fetch_order() {
        let mut listing = Listing::new(ListingConfig::doctor(), 1);
        let records = (1..=25).rev().map(|id| study(id, &format!("P{id}"))).collect::<Vec<_>>();
        listing.replace_records(records, true);
        assert_eq!(listing.pager().total_pages(), 3);
        assert_eq!(entry_ids(listing.page_entries()), (16..=25).rev().collect::<Vec<_>>());
        assert!(listing.go_to_page(3));
        assert_eq!(entry_ids(listing.page_entries()), (1..=5).rev().collect::<Vec<_>>());
    }

    #[test]
    fn institute_listing_paginates_groups() {
        let mut listing = Listing::new(ListingConfig::institute(), 1);
        let mut records = Vec::new();
        for id in 1..=24 {
            records.push(study(id, &format!("P{}", id % 12)));
        }
        listing.replace_records(records, true);
        assert_eq!(listing.entries().len(), 12);
        assert_eq!(listing.pager().total_pages(), 2);
        assert!(listing.page_entries().iter().all(|entry| entry.study_count() == 2));
        assert_eq!(entry_ids(listing.page_entries())[0], 24);
    }

    #[test]
    fn refresh_keeps_page_but_filter_edits_reset_it() {
        let records = (1..=30).map(|id| study(id, &format!("P{id}"))).collect::<Vec<_>>();
        let mut listing = Listing::new(ListingConfig::doctor(), 3);
        listing.replace_records(records.clone(), true);
        assert_eq!(listing.current_page(), 3);

        listing.replace_records(records.clone(), true);
        assert_eq!(listing.current_page(), 3);

        listing.replace_records(records[..15].to_vec(), true);
        assert_eq!(listing.current_page(), 2);

        let filter = StudyFilter { name: "patient".to_string(), ..StudyFilter::default() };
        listing.set_filter(filter);
        assert_eq!(listing.current_page(), 1);
    }

    #[test]
    fn emergency_filter_with_no_matches_renders_nothing() {
        let records = (1..=10).map(|id| study(id, "P1")).collect::<Vec<_>>();
        let mut listing = Listing::new(ListingConfig::doctor(), 1);
        listing.replace_records(records, true);
        listing.set_filter(StudyFilter { emergency_only: true, ..StudyFilter::default() });
        assert!(listing.entries().is_empty());
        assert_eq!(listing.pager().total_pages(), 0);
        assert!(listing.page_entries().is_empty());
        assert!(listing.pager().controls().is_none());
    }

    #[test]
    fn clearing_drops_records_and_entries() {
        let mut listing = Listing::new(ListingConfig::institute(), 1);
        listing.replace_records(vec![study(1, "P1")], true);
        listing.set_filter(StudyFilter {
            status: StatusFilter::Only(StudyStatus::NotAssigned),
            ..StudyFilter::default()
        });
        assert_eq!(listing.entries().len(), 1);
        listing.clear();
        assert!(listing.records().is_empty());
        assert!(listing.page_entries().is_empty());
    }
}
