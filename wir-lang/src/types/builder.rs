/// Build a [`FnSig`](crate::types::FnSig) from parameter and result type ids.
///
/// ```ignore
/// let s = sig!([p.i32, p.i32] => [p.i64]);
/// ```
#[macro_export]
macro_rules! sig {
    ([$($param:expr),* $(,)?] => [$($result:expr),* $(,)?]) => {
        $crate::types::FnSig::new(vec![$($param),*], vec![$($result),*])
    };
}

#[macro_export]
macro_rules! method {
    ($name:expr, $sig:expr, $target:expr) => {
        $crate::types::Method::new($name, $sig, $target)
    };
    ($name:expr, $sig:expr) => {
        $crate::types::Method::abstract_method($name, $sig)
    };
}
