//! End-to-end loader behaviour over in-process plugin libraries.
//!
//! Every test installs its fixture library under its own path, because the
//! registry (and the in-process catalog) are process-global and the test
//! harness runs tests in parallel.

use openplugin_loader::in_process::{self, InProcessLibrary};
use openplugin_loader::{registry, MultiLibraryPluginLoader, PluginLoader, PluginLoaderError};

type TestResult = Result<(), Box<dyn std::error::Error>>;

trait Animal {
    fn say_something(&self) -> String;
}

trait Vehicle {
    fn wheels(&self) -> u32;
}

#[derive(Default)]
struct Cat;

impl Animal for Cat {
    fn say_something(&self) -> String {
        "meow".to_string()
    }
}

#[derive(Default)]
struct Dog;

impl Animal for Dog {
    fn say_something(&self) -> String {
        "woof".to_string()
    }
}

#[derive(Default)]
struct Robot;

impl Animal for Robot {
    fn say_something(&self) -> String {
        "beep".to_string()
    }
}

fn register_animals() {
    registry::register_factory::<dyn Animal>("Cat", "Animal", || Box::new(Cat) as Box<dyn Animal>);
    registry::register_factory::<dyn Animal>("Dog", "Animal", || Box::new(Dog) as Box<dyn Animal>);
}

fn register_robots() {
    registry::register_factory::<dyn Animal>("Robot", "Animal", || {
        Box::new(Robot) as Box<dyn Animal>
    });
}

fn install(path: &str, constructor: fn()) {
    in_process::install(InProcessLibrary::new(path).with_constructor(constructor));
}

mod basic {
    use super::*;

    #[test]
    fn test_load_and_create() -> TestResult {
        install("libanimals_basic.so", register_animals);
        let loader = PluginLoader::new("libanimals_basic.so")?;

        let classes = loader.available_classes::<dyn Animal>();
        assert!(classes.iter().any(|name| name == "Cat"));
        assert!(classes.iter().any(|name| name == "Dog"));

        let cat = loader.create_instance::<dyn Animal>("Cat")?;
        assert_eq!(cat.say_something(), "meow");
        Ok(())
    }

    #[test]
    fn test_eager_load_unload_roundtrip() -> TestResult {
        install("libanimals_roundtrip.so", register_animals);
        assert!(!registry::is_library_loaded_by_anybody(
            "libanimals_roundtrip.so"
        ));

        let loader = PluginLoader::new("libanimals_roundtrip.so")?;
        assert!(registry::is_library_loaded_by_anybody(
            "libanimals_roundtrip.so"
        ));
        assert!(loader.is_library_loaded());

        loader.unload_library()?;
        assert!(!registry::is_library_loaded_by_anybody(
            "libanimals_roundtrip.so"
        ));
        assert!(!loader.is_library_loaded());
        Ok(())
    }

    #[test]
    fn test_nonexistent_class() -> TestResult {
        install("libanimals_nobear.so", register_animals);
        let loader = PluginLoader::new("libanimals_nobear.so")?;

        let err = loader
            .create_instance::<dyn Animal>("Bear")
            .expect_err("Bear is not registered");
        assert!(matches!(err, PluginLoaderError::CreateClass { .. }));
        Ok(())
    }

    #[test]
    fn test_nonexistent_library() {
        let err = PluginLoader::new("libDoesNotExist.so").expect_err("no such file");
        assert!(matches!(err, PluginLoaderError::LibraryLoad { .. }));
    }

    #[test]
    fn test_base_interface_discrimination() -> TestResult {
        install("libanimals_bases.so", register_animals);
        let loader = PluginLoader::new("libanimals_bases.so")?;

        assert!(!loader.is_class_available::<dyn Vehicle>("Cat"));
        assert!(loader.is_class_available::<dyn Animal>("Cat"));
        Ok(())
    }

    #[test]
    fn test_debug_snapshot_lists_state() -> TestResult {
        install("libanimals_snapshot.so", register_animals);
        let loader = PluginLoader::new("libanimals_snapshot.so")?;

        let snapshot = registry::debug_snapshot();
        assert!(snapshot.contains("libanimals_snapshot.so"));
        assert!(snapshot.contains("Cat"));

        assert_eq!(
            loader.owned_libraries(),
            vec!["libanimals_snapshot.so".to_string()]
        );
        Ok(())
    }
}

mod lazy {
    use super::*;

    #[test]
    fn test_lazy_self_unload() -> TestResult {
        install("libanimals_lazy.so", register_animals);
        let loader = PluginLoader::lazy("libanimals_lazy.so");
        assert!(!registry::is_library_loaded_by_anybody("libanimals_lazy.so"));
        assert!(!loader.is_library_loaded());

        {
            let cat = loader.create_instance::<dyn Animal>("Cat")?;
            assert_eq!(cat.say_something(), "meow");
            assert!(registry::is_library_loaded_by_anybody("libanimals_lazy.so"));
            assert!(loader.is_library_loaded());
        }

        // The last instance is gone, so the library went with it.
        assert!(!registry::is_library_loaded_by_anybody("libanimals_lazy.so"));
        assert!(!loader.is_library_loaded());
        Ok(())
    }

    #[test]
    fn test_lazy_ref_counting() -> TestResult {
        install("libanimals_lazyref.so", register_animals);
        let loader = PluginLoader::lazy("libanimals_lazyref.so");

        {
            let _dog = loader.create_instance::<dyn Animal>("Dog")?;
            assert!(loader.is_library_loaded());
        }
        assert!(!loader.is_library_loaded());

        loader.load_library()?;
        assert!(loader.is_library_loaded());
        assert_eq!(loader.load_count(), 1);

        loader.load_library()?;
        assert!(loader.is_library_loaded());
        assert_eq!(loader.load_count(), 2);

        loader.unload_library()?;
        assert!(loader.is_library_loaded());
        assert_eq!(loader.load_count(), 1);

        loader.unload_library()?;
        assert!(!loader.is_library_loaded());

        loader.unload_library()?;
        assert!(!loader.is_library_loaded());

        loader.load_library()?;
        assert!(loader.is_library_loaded());
        Ok(())
    }

    #[test]
    fn test_eager_ref_counting() -> TestResult {
        install("libanimals_eagerref.so", register_animals);
        let loader = PluginLoader::new("libanimals_eagerref.so")?;
        assert!(loader.is_library_loaded());

        loader.load_library()?;
        loader.load_library()?;
        assert!(loader.is_library_loaded());
        assert_eq!(loader.load_count(), 3);

        loader.unload_library()?;
        assert!(loader.is_library_loaded());

        loader.unload_library()?;
        assert!(loader.is_library_loaded());

        loader.unload_library()?;
        assert!(!loader.is_library_loaded());

        loader.unload_library()?;
        assert!(!loader.is_library_loaded());

        loader.load_library()?;
        assert!(loader.is_library_loaded());
        Ok(())
    }
}

mod ownership {
    use super::*;

    #[test]
    fn test_second_loader_shares_library() -> TestResult {
        install("libanimals_shared.so", register_animals);
        let first = PluginLoader::new("libanimals_shared.so")?;
        let second = PluginLoader::new("libanimals_shared.so")?;

        assert_eq!(
            first.create_instance::<dyn Animal>("Cat")?.say_something(),
            "meow"
        );
        assert_eq!(
            second.create_instance::<dyn Animal>("Dog")?.say_something(),
            "woof"
        );

        first.unload_library()?;
        // The second loader still owns the factories, so the library stays.
        assert!(registry::is_library_loaded_by_anybody("libanimals_shared.so"));
        let err = first
            .create_instance::<dyn Animal>("Cat")
            .expect_err("first loader released its ownership");
        assert!(matches!(err, PluginLoaderError::CreateClass { .. }));
        assert_eq!(
            second.create_instance::<dyn Animal>("Cat")?.say_something(),
            "meow"
        );

        second.unload_library()?;
        assert!(!registry::is_library_loaded_by_anybody(
            "libanimals_shared.so"
        ));
        Ok(())
    }

    #[test]
    fn test_graveyard_revival() -> TestResult {
        install("libanimals_graveyard.so", register_animals);
        let first = PluginLoader::new("libanimals_graveyard.so")?;
        first.unload_library()?;
        assert!(!registry::is_library_loaded_by_anybody(
            "libanimals_graveyard.so"
        ));

        // The re-open does not re-run the library's constructors (the code
        // never left the process), so these factories can only come back
        // from the graveyard.
        let second = PluginLoader::new("libanimals_graveyard.so")?;
        let classes = second.available_classes::<dyn Animal>();
        assert!(classes.iter().any(|name| name == "Cat"));
        assert!(classes.iter().any(|name| name == "Dog"));
        assert_eq!(
            second.create_instance::<dyn Animal>("Cat")?.say_something(),
            "meow"
        );
        Ok(())
    }

    #[test]
    fn test_duplicate_registration_overwrites() -> TestResult {
        fn register_twice() {
            registry::register_factory::<dyn Animal>("Cat", "Animal", || {
                Box::new(Cat) as Box<dyn Animal>
            });
            registry::register_factory::<dyn Animal>("Cat", "Animal", || {
                Box::new(Dog) as Box<dyn Animal>
            });
        }
        install("libanimals_collision.so", register_twice);
        let loader = PluginLoader::new("libanimals_collision.so")?;

        let classes = loader.available_classes::<dyn Animal>();
        assert_eq!(classes.iter().filter(|name| *name == "Cat").count(), 1);
        // Last writer wins.
        assert_eq!(
            loader.create_instance::<dyn Animal>("Cat")?.say_something(),
            "woof"
        );
        Ok(())
    }

    #[test]
    fn test_owner_filter_between_libraries() -> TestResult {
        install("libanimals_filter.so", register_animals);
        install("librobots_filter.so", register_robots);
        let animals = PluginLoader::new("libanimals_filter.so")?;
        let robots = PluginLoader::new("librobots_filter.so")?;

        let animal_classes = animals.available_classes::<dyn Animal>();
        assert!(!animal_classes.iter().any(|name| name == "Robot"));
        assert!(robots.is_class_available::<dyn Animal>("Robot"));

        let err = animals
            .create_instance::<dyn Animal>("Robot")
            .expect_err("Robot belongs to the other loader");
        assert!(matches!(err, PluginLoaderError::CreateClass { .. }));
        Ok(())
    }
}

mod aggregate {
    use super::*;

    #[test]
    fn test_create_across_two_libraries() -> TestResult {
        install("libanimals_multi.so", register_animals);
        install("librobots_multi.so", register_robots);

        let multi = MultiLibraryPluginLoader::new(false);
        multi.load_library("libanimals_multi.so")?;
        multi.load_library("librobots_multi.so")?;

        for _ in 0..2 {
            assert_eq!(
                multi.create_instance::<dyn Animal>("Cat")?.say_something(),
                "meow"
            );
            assert_eq!(
                multi.create_instance::<dyn Animal>("Dog")?.say_something(),
                "woof"
            );
            assert_eq!(
                multi
                    .create_instance::<dyn Animal>("Robot")?
                    .say_something(),
                "beep"
            );
        }

        let mut libraries = multi.registered_libraries();
        libraries.sort();
        assert_eq!(libraries, vec!["libanimals_multi.so", "librobots_multi.so"]);
        Ok(())
    }

    #[test]
    fn test_create_across_two_libraries_lazily() -> TestResult {
        install("libanimals_multilazy.so", register_animals);
        install("librobots_multilazy.so", register_robots);

        let multi = MultiLibraryPluginLoader::new(true);
        multi.load_library("libanimals_multilazy.so")?;
        multi.load_library("librobots_multilazy.so")?;

        for _ in 0..2 {
            multi.create_instance::<dyn Animal>("Cat")?;
            multi.create_instance::<dyn Animal>("Dog")?;
            multi.create_instance::<dyn Animal>("Robot")?;
        }
        Ok(())
    }

    #[test]
    fn test_instances_outlive_aggregate() -> TestResult {
        install("libanimals_outlive.so", register_animals);
        install("librobots_outlive.so", register_robots);

        let (cat, robot) = {
            let multi = MultiLibraryPluginLoader::new(true);
            multi.load_library("libanimals_outlive.so")?;
            multi.load_library("librobots_outlive.so")?;
            (
                multi.create_instance::<dyn Animal>("Cat")?,
                multi.create_instance::<dyn Animal>("Robot")?,
            )
        };

        // The aggregate is gone; the instances keep their libraries alive.
        assert_eq!(cat.say_something(), "meow");
        assert_eq!(robot.say_something(), "beep");
        drop(cat);
        drop(robot);
        assert!(!registry::is_library_loaded_by_anybody(
            "libanimals_outlive.so"
        ));
        assert!(!registry::is_library_loaded_by_anybody(
            "librobots_outlive.so"
        ));
        Ok(())
    }

    #[test]
    fn test_unknown_class_across_all_libraries() -> TestResult {
        install("libanimals_unknown.so", register_animals);
        let multi = MultiLibraryPluginLoader::new(false);
        multi.load_library("libanimals_unknown.so")?;

        let err = multi
            .create_instance::<dyn Animal>("Spaceship")
            .expect_err("nobody exports Spaceship");
        assert!(matches!(err, PluginLoaderError::CreateClass { .. }));
        Ok(())
    }
}

mod threading {
    use super::*;

    #[test]
    fn test_concurrent_listing_and_creation() -> TestResult {
        install("libanimals_threads.so", register_animals);
        let loader = PluginLoader::new("libanimals_threads.so")?;

        std::thread::scope(|scope| {
            for _ in 0..1000 {
                scope.spawn(|| {
                    for class_name in loader.available_classes::<dyn Animal>() {
                        let instance = loader
                            .create_instance::<dyn Animal>(&class_name)
                            .expect("listed classes must be creatable");
                        assert!(!instance.say_something().is_empty());
                    }
                });
            }
        });

        loader.unload_library()?;
        assert!(!loader.is_library_loaded());
        Ok(())
    }
}
