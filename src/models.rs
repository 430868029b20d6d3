use serde::Serialize;

/// Registered bot user (allow-list entry)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: String,
    pub display_name: String,
}

/// One row of the external changes log
/// `date` is always ISO `YYYY-MM-DD`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRow {
    pub date: String,
    pub category: String,
}

/// Inclusive date range, both ends in ISO form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    pub fn contains(&self, iso_date: &str) -> bool {
        self.start.as_str() <= iso_date && iso_date <= self.end.as_str()
    }
}

/// Closed set of change categories the report knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    AppBanned,
    AppAppearedInStore,
    NewAppUploaded,
    AppReturnedToStore,
}

impl Category {
    /// Report order
    pub const ALL: [Category; 4] = [
        Category::AppBanned,
        Category::AppAppearedInStore,
        Category::NewAppUploaded,
        Category::AppReturnedToStore,
    ];

    /// Literal category string as written to the log
    pub fn label(self) -> &'static str {
        match self {
            Category::AppBanned => "Бан приложения",
            Category::AppAppearedInStore => "Приложение появилось в сторе",
            Category::NewAppUploaded => "Загружено новое приложение",
            Category::AppReturnedToStore => "Приложение вернулось в стор",
        }
    }

    pub fn from_label(label: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.label() == label)
    }
}

/// Per-category counts, all four categories always present
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryTally {
    counts: [u64; 4],
}

impl CategoryTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, category: Category) {
        self.counts[Self::slot(category)] += 1;
    }

    pub fn get(&self, category: Category) -> u64 {
        self.counts[Self::slot(category)]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// (category, count) pairs in report order, zeros included
    pub fn entries(&self) -> impl Iterator<Item = (Category, u64)> + '_ {
        Category::ALL.into_iter().map(|c| (c, self.get(c)))
    }

    /// `🔹 *<category>*: <count>` lines (Telegram Markdown), one per category
    pub fn summary_text(&self) -> String {
        self.entries()
            .map(|(category, count)| format!("🔹 *{}*: {}", category.label(), count))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn slot(category: Category) -> usize {
        match category {
            Category::AppBanned => 0,
            Category::AppAppearedInStore => 1,
            Category::NewAppUploaded => 2,
            Category::AppReturnedToStore => 3,
        }
    }
}

/// Result of one `/stats` request
#[derive(Debug, Clone)]
pub struct Report {
    pub tally: CategoryTally,
    /// PNG bytes
    pub chart: Vec<u8>,
    /// Ready-to-send Markdown message
    pub summary_text: String,
}
