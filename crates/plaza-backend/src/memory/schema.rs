//! Foreign-key relations used to resolve embedded selects

/// A relation between two tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// `from.column` references `to.id`; embeds as an object (or null)
    ManyToOne {
        /// Referencing table
        from: String,
        /// Foreign-key column on `from`
        column: String,
        /// Referenced table
        to: String,
    },
    /// `to.column` references `from.id`; embeds as an array
    OneToMany {
        /// Parent table
        from: String,
        /// Child table
        to: String,
        /// Foreign-key column on `to`
        column: String,
    },
}

/// Set of relations known to a [`super::MemoryBackend`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    relations: Vec<Relation>,
}

impl Schema {
    /// Empty schema
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `from.column -> to.id`, also registering the reverse one-to-many
    #[must_use]
    pub fn foreign_key(mut self, from: &str, column: &str, to: &str) -> Self {
        self.relations.push(Relation::ManyToOne {
            from: from.to_string(),
            column: column.to_string(),
            to: to.to_string(),
        });
        self.relations.push(Relation::OneToMany {
            from: to.to_string(),
            to: from.to_string(),
            column: column.to_string(),
        });
        self
    }

    /// Relation for embedding `embed` into rows of `table`
    #[must_use]
    pub fn relation(&self, table: &str, embed: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| match relation {
            Relation::ManyToOne { from, to, .. } | Relation::OneToMany { from, to, .. } => {
                from == table && to == embed
            }
        })
    }

    /// All relations
    #[inline]
    #[must_use]
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }
}
