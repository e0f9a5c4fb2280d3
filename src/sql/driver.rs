use crate::error::DriverError;
use crate::sql::statement::Statement;

/// A relational store the persister writes to.
///
/// Implementations report schema problems as
/// [`DriverError::Schema`](crate::error::DriverError::Schema) so the
/// persister can repair the table and retry; everything else is treated as
/// fatal.
pub trait StoreDriver {
    fn execute(&mut self, statement: &Statement) -> Result<(), DriverError>;

    /// Identity value generated by the last successful insert
    fn last_inserted_id(&mut self) -> Result<i64, DriverError>;

    /// Make everything executed so far durable
    fn commit(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
}

impl<D: StoreDriver + ?Sized> StoreDriver for &mut D {
    fn execute(&mut self, statement: &Statement) -> Result<(), DriverError> {
        (**self).execute(statement)
    }

    fn last_inserted_id(&mut self) -> Result<i64, DriverError> {
        (**self).last_inserted_id()
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        (**self).commit()
    }
}
