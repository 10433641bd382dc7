/// Determines what happens when a pool is torn down while some of its objects are still on loan.
///
/// By default, the pool may be torn down at any time. Objects that are on loan at that point are
/// disposed of by their [`Loan`][crate::Loan] when it is released.
///
/// # Examples
///
/// ```
/// use lending_pool::{DropPolicy, LendingPool};
///
/// let pool = LendingPool::<String>::builder()
///     .drop_policy(DropPolicy::MustNotAbandonLoans)
///     .build()
///     .unwrap();
///
/// pool.push("hello".to_string()).unwrap();
///
/// {
///     let _loan = pool.acquire();
/// }
///
/// // All objects are back home, so dropping the pool is fine.
/// drop(pool);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be torn down while objects are on loan. This is the default.
    #[default]
    MayAbandonLoans,

    /// The pool will panic if it is torn down while any of its objects are still on loan.
    ///
    /// This may be valuable if objects on loan are expected to come back before shutdown, for
    /// example to detect workers that are still running when they are supposed to be done.
    MustNotAbandonLoans,
}
