//! Sample plugin library.
//!
//! Builds as a `cdylib`. Opening it through a
//! [`PluginLoader`](openplugin_loader::PluginLoader) runs the registrations
//! below; the host then creates `Cat`, `Dog` and the math operations by
//! name through the `openplugin-demo-abi` interfaces.

use openplugin_demo_abi::{Animal, MathOperation};
use openplugin_loader::register_plugin;

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

register_plugin!(Cat, Animal);
register_plugin!(Dog, Animal);

#[derive(Default)]
struct PlusOperation;

impl MathOperation for PlusOperation {
    fn op(&self, lhs: f64, rhs: f64) -> f64 {
        lhs + rhs
    }
}

#[derive(Default)]
struct SubstractOperation;

impl MathOperation for SubstractOperation {
    fn op(&self, lhs: f64, rhs: f64) -> f64 {
        lhs - rhs
    }
}

#[derive(Default)]
struct MultiplyOperation;

impl MathOperation for MultiplyOperation {
    fn op(&self, lhs: f64, rhs: f64) -> f64 {
        lhs * rhs
    }
}

#[derive(Default)]
struct DivideOperation;

impl MathOperation for DivideOperation {
    fn op(&self, lhs: f64, rhs: f64) -> f64 {
        if rhs == 0.0 {
            return 0.0;
        }
        lhs / rhs
    }
}

register_plugin!(PlusOperation, MathOperation);
register_plugin!(SubstractOperation, MathOperation);
register_plugin!(MultiplyOperation, MathOperation);
register_plugin!(DivideOperation, MathOperation);
