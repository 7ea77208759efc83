//! Driver capability set consulted by the diff builder.

use bitflags::bitflags;

/// A server feature the diff builder needs to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Schemas,
    Views,
    MaterializedViews,
    StoredRoutines,
    ReferentialConstraints,
    /// Per-column ASC/DESC ordering in indexes.
    OrderedIndexColumns,
    /// Non-key covering columns (`INCLUDE`).
    IncludedIndexColumns,
    /// Partial indexes with a `WHERE` predicate.
    FilteredIndexes,
    ClusteredIndexes,
    Sequences,
    CustomTypes,
}

impl Feature {
    pub const ALL: [Feature; 11] = [
        Feature::Schemas,
        Feature::Views,
        Feature::MaterializedViews,
        Feature::StoredRoutines,
        Feature::ReferentialConstraints,
        Feature::OrderedIndexColumns,
        Feature::IncludedIndexColumns,
        Feature::FilteredIndexes,
        Feature::ClusteredIndexes,
        Feature::Sequences,
        Feature::CustomTypes,
    ];

    pub const fn flag(self) -> Capabilities {
        match self {
            Feature::Schemas => Capabilities::SCHEMAS,
            Feature::Views => Capabilities::VIEWS,
            Feature::MaterializedViews => Capabilities::MATERIALIZED_VIEWS,
            Feature::StoredRoutines => Capabilities::STORED_ROUTINES,
            Feature::ReferentialConstraints => Capabilities::REFERENTIAL_CONSTRAINTS,
            Feature::OrderedIndexColumns => Capabilities::ORDERED_INDEX_COLUMNS,
            Feature::IncludedIndexColumns => Capabilities::INCLUDED_INDEX_COLUMNS,
            Feature::FilteredIndexes => Capabilities::FILTERED_INDEXES,
            Feature::ClusteredIndexes => Capabilities::CLUSTERED_INDEXES,
            Feature::Sequences => Capabilities::SEQUENCES,
            Feature::CustomTypes => Capabilities::CUSTOM_TYPES,
        }
    }
}

bitflags! {
    /// Set of [`Feature`]s supported by a driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Capabilities: u16 {
        const SCHEMAS = 1;
        const VIEWS = 1 << 1;
        const MATERIALIZED_VIEWS = 1 << 2;
        const STORED_ROUTINES = 1 << 3;
        const REFERENTIAL_CONSTRAINTS = 1 << 4;
        const ORDERED_INDEX_COLUMNS = 1 << 5;
        const INCLUDED_INDEX_COLUMNS = 1 << 6;
        const FILTERED_INDEXES = 1 << 7;
        const CLUSTERED_INDEXES = 1 << 8;
        const SEQUENCES = 1 << 9;
        const CUSTOM_TYPES = 1 << 10;
    }
}

impl Capabilities {
    pub const NONE: Self = Self::empty();

    /// PostgreSQL capabilities.
    pub const POSTGRESQL: Self = Self::NONE
        .with(Feature::Schemas)
        .with(Feature::Views)
        .with(Feature::MaterializedViews)
        .with(Feature::StoredRoutines)
        .with(Feature::ReferentialConstraints)
        .with(Feature::OrderedIndexColumns)
        .with(Feature::IncludedIndexColumns)
        .with(Feature::FilteredIndexes)
        .with(Feature::Sequences)
        .with(Feature::CustomTypes);

    /// SQL Server capabilities.
    pub const MSSQL: Self = Self::POSTGRESQL
        .with(Feature::ClusteredIndexes)
        .without(Feature::CustomTypes);

    /// MySQL capabilities. Schemas are databases and are not managed.
    pub const MYSQL: Self = Self::NONE
        .with(Feature::Views)
        .with(Feature::StoredRoutines)
        .with(Feature::ReferentialConstraints)
        .with(Feature::OrderedIndexColumns)
        .with(Feature::ClusteredIndexes);

    /// SQLite capabilities.
    pub const SQLITE: Self = Self::NONE
        .with(Feature::Views)
        .with(Feature::ReferentialConstraints)
        .with(Feature::OrderedIndexColumns)
        .with(Feature::FilteredIndexes);

    pub const fn supports(self, feature: Feature) -> bool {
        self.contains(feature.flag())
    }

    pub const fn with(self, feature: Feature) -> Self {
        self.union(feature.flag())
    }

    pub const fn without(self, feature: Feature) -> Self {
        self.difference(feature.flag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(Capabilities::POSTGRESQL.supports(Feature::FilteredIndexes));
        assert!(!Capabilities::POSTGRESQL.supports(Feature::ClusteredIndexes));
        assert!(Capabilities::MSSQL.supports(Feature::ClusteredIndexes));
        assert!(!Capabilities::MSSQL.supports(Feature::CustomTypes));
        assert!(!Capabilities::SQLITE.supports(Feature::StoredRoutines));
    }

    #[test]
    fn test_with_without() {
        let caps = Capabilities::NONE.with(Feature::Views);
        assert!(caps.supports(Feature::Views));
        assert!(!caps.without(Feature::Views).supports(Feature::Views));
        assert_eq!(Capabilities::all().bits().count_ones() as usize, Feature::ALL.len());
        assert!(Feature::ALL.iter().all(|f| Capabilities::all().supports(*f)));
    }
}
