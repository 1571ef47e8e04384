use crate::error::ClientError;

/// One remote call against a leased connection.
///
/// An operation owns everything it needs, including its timestamp, and may
/// be executed more than once: every retry calls `execute` again on the same
/// value with a fresh connection.
pub trait Operation<C> {
    type Output;

    fn execute(&self, conn: &mut C) -> Result<Self::Output, ClientError>;
}

impl<C, R, F> Operation<C> for F
where
    F: Fn(&mut C) -> Result<R, ClientError>,
{
    type Output = R;

    fn execute(&self, conn: &mut C) -> Result<R, ClientError> {
        self(conn)
    }
}
