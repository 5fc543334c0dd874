//! Compile-time plugin registration.

/// Register `$derived` as a plugin implementation of the `$base` trait.
///
/// Expands to a static constructor that runs while the containing library
/// is being opened and calls
/// [`register_factory`](crate::registry::register_factory) with the
/// stringified type names. Each invocation lives in its own anonymous
/// scope, so any number of registrations can share a file.
///
/// `$derived` must implement both `$base` and [`Default`]; `$base` must be
/// object safe. Register each (derived, base) pair exactly once per
/// library.
///
/// ```ignore
/// use openplugin_loader::register_plugin;
///
/// trait Animal {
///     fn say_something(&self) -> String;
/// }
///
/// #[derive(Default)]
/// struct Cat;
///
/// impl Animal for Cat {
///     fn say_something(&self) -> String {
///         "meow".to_string()
///     }
/// }
///
/// register_plugin!(Cat, Animal);
/// ```
#[macro_export]
macro_rules! register_plugin {
    ($derived:ty, $base:path) => {
        const _: () = {
            #[$crate::__private::ctor]
            fn register_plugin_factory() {
                $crate::registry::register_factory::<dyn $base>(
                    ::core::stringify!($derived),
                    ::core::stringify!($base),
                    || {
                        ::std::boxed::Box::new(<$derived as ::core::default::Default>::default())
                            as ::std::boxed::Box<dyn $base>
                    },
                );
            }
        };
    };
}
