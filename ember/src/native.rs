use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{NativeFunction, Value};

pub fn natives() -> Vec<NativeFunction> {
    vec![
        NativeFunction {
            name: "time",
            arity: 0,
            func: time,
        },
        NativeFunction {
            name: "print",
            arity: 1,
            func: print,
        },
    ]
}

/// Seconds since the Unix epoch.
fn time(_args: &[Value], _out: &mut dyn Write) -> Result<Value, String> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("System clock is before the Unix epoch: {}", e))?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

fn print(args: &[Value], out: &mut dyn Write) -> Result<Value, String> {
    for arg in args {
        writeln!(out, "{}", arg).map_err(|e| format!("Could not write output: {}", e))?;
    }
    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natives_are_time_and_print() {
        let names: Vec<&str> = natives().iter().map(|n| n.name).collect();
        assert_eq!(names, ["time", "print"]);
    }

    #[test]
    fn print_writes_display_form_and_returns_nil() {
        let mut out = Vec::new();
        let result = print(&[Value::Number(2.0)], &mut out).unwrap();
        assert_eq!(result, Value::Nil);
        assert_eq!(String::from_utf8(out).unwrap(), "2\n");
    }

    #[test]
    fn time_is_after_2020() {
        let Value::Number(seconds) = time(&[], &mut std::io::sink()).unwrap() else {
            panic!("time should return a number");
        };
        assert!(seconds > 1_577_836_800.0);
    }
}
