//! Best-effort steps: a failed step is logged under the given target and the
//! caller continues with `None`.

#[doc(hidden)]
#[macro_export]
macro_rules! __best_effort {
    ($level: expr, $target: literal, $context: literal, $step: expr) => {
        match $step {
            Ok(value) => Some(value),
            Err(err) => {
                log::log!(target: $target, $level, "{}: {:#}", $context, err);
                None
            }
        }
    };
}

/// Evaluate a fallible step, a failure is logged at warn level.
///
/// ```ignore
/// warn_on_err!("bridge", "read request", reader.read_until(b'\n', &mut buf));
/// ```
#[macro_export]
macro_rules! warn_on_err {
    ($target: literal, $context: literal, $step: expr) => {
        $crate::__best_effort!(log::Level::Warn, $target, $context, $step)
    };
}

/// Like [`warn_on_err!`] but for failures nobody needs to see outside debug logs.
#[macro_export]
macro_rules! debug_on_err {
    ($target: literal, $context: literal, $step: expr) => {
        $crate::__best_effort!(log::Level::Debug, $target, $context, $step)
    };
}
