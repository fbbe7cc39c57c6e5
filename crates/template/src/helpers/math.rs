//! Arithmetic helpers. Arguments coerce to numbers; a non-numeric argument yields NaN.

use super::{arg, HelperContext, HelperError, HelperFn};
use crate::value::Value;
use rand::Rng;

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("isNaN", is_nan),
    ("abs", abs),
    ("ceil", ceil),
    ("floor", floor),
    ("round", round),
    ("sign", sign),
    ("trunc", trunc),
    ("max", max),
    ("min", min),
    ("pow", pow),
    ("random", random),
    ("add", add),
    ("subtract", subtract),
    ("multiply", multiply),
    ("divide", divide),
];

type HelperResult = Result<Value, HelperError>;

fn unary(args: &[Value], op: fn(f64) -> f64) -> HelperResult {
    Ok(Value::Number(op(arg(args, 0).to_number())))
}

fn binary(args: &[Value], op: fn(f64, f64) -> f64) -> HelperResult {
    Ok(Value::Number(op(
        arg(args, 0).to_number(),
        arg(args, 1).to_number(),
    )))
}

fn is_nan(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(Value::Bool(arg(args, 0).to_number().is_nan()))
}

fn abs(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    unary(args, f64::abs)
}

fn ceil(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    unary(args, f64::ceil)
}

fn floor(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    unary(args, f64::floor)
}

/// Halves round towards positive infinity, so `-5.5` rounds to `-5`.
fn round(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    unary(args, |x| (x + 0.5).floor())
}

fn sign(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    unary(args, |x| if x == 0.0 || x.is_nan() { x } else { x.signum() })
}

fn trunc(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    unary(args, f64::trunc)
}

fn fold(args: &[Value], start: f64, pick: fn(f64, f64) -> f64) -> HelperResult {
    let mut acc = start;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        acc = pick(acc, n);
    }
    Ok(Value::Number(acc))
}

fn max(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    fold(args, f64::NEG_INFINITY, f64::max)
}

fn min(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    fold(args, f64::INFINITY, f64::min)
}

fn pow(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    binary(args, f64::powf)
}

fn random(_: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    Ok(Value::Number(rand::thread_rng().gen::<f64>()))
}

fn add(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    binary(args, |x, y| x + y)
}

fn subtract(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    binary(args, |x, y| x - y)
}

fn multiply(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    binary(args, |x, y| x * y)
}

fn divide(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    binary(args, |x, y| x / y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::testing::call;
    use crate::DataType;

    fn num(name: &str, args: &[f64]) -> f64 {
        let args: Vec<Value> = args.iter().copied().map(Value::Number).collect();
        call(DataType::Cda, name, &args)
            .expect("helper succeeds")
            .to_number()
    }

    #[test]
    fn rounding_matches_script_math() {
        assert_eq!(num("round", &[-5.5]), -5.0);
        assert_eq!(num("round", &[10.9]), 11.0);
        assert_eq!(num("round", &[10.1]), 10.0);
        assert_eq!(num("ceil", &[1.1]), 2.0);
        assert_eq!(num("floor", &[1.9]), 1.0);
        assert_eq!(num("trunc", &[9.89]), 9.0);
        assert_eq!(num("sign", &[-5.0]), -1.0);
        assert_eq!(num("sign", &[0.0]), 0.0);
    }

    #[test]
    fn arithmetic_coerces_strings() {
        let args = [Value::from("5"), Value::from("4")];
        assert_eq!(
            call(DataType::Cda, "add", &args).expect("add succeeds").to_number(),
            9.0
        );
        assert_eq!(num("divide", &[10.0, 5.0]), 2.0);
        assert_eq!(num("pow", &[3.0, 3.0]), 27.0);
        assert_eq!(num("max", &[3.0, 4.0, 5.0]), 5.0);
        assert_eq!(num("min", &[3.0, 4.0, 5.0]), 3.0);
    }

    #[test]
    fn is_nan_and_random() {
        assert!(call(DataType::Cda, "isNaN", &[Value::from("A")])
            .expect("isNaN succeeds")
            .is_truthy());
        assert!(!call(DataType::Cda, "isNaN", &[Value::Number(5.0)])
            .expect("isNaN succeeds")
            .is_truthy());
        let n = num("random", &[]);
        assert!((0.0..1.0).contains(&n));
    }
}
