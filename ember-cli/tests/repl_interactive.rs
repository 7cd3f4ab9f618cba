use rexpect::error::Error;
use rexpect::session::PtySession;
use rexpect::spawn;

fn ember_repl() -> Result<PtySession, Error> {
    spawn(env!("CARGO_BIN_EXE_ember"), Some(10_000))
}

#[test]
fn ctrl_c_on_empty_prompt_exits() -> Result<(), Error> {
    let mut p = ember_repl()?;
    p.exp_string("> ")?;
    p.send_control('c')?;
    p.exp_eof()?;
    Ok(())
}

#[test]
fn ctrl_d_exits_repl() -> Result<(), Error> {
    let mut p = ember_repl()?;
    p.exp_string("> ")?;
    p.send_control('d')?;
    p.exp_eof()?;
    Ok(())
}

#[test]
fn ctrl_c_mid_block_cancels_and_continues() -> Result<(), Error> {
    let mut p = ember_repl()?;
    p.exp_string("> ")?;

    p.send_line("{")?;
    p.exp_string("..1 ")?;

    // Cancels the pending block only
    p.send_control('c')?;
    p.exp_string("> ")?;

    p.send_line("print(40 + 2);")?;
    p.exp_string("42")?;

    p.send_control('d')?;
    p.exp_eof()?;
    Ok(())
}

#[test]
fn bare_expressions_are_echoed() -> Result<(), Error> {
    let mut p = ember_repl()?;
    p.exp_string("> ")?;

    p.send_line("let word = \"ember\";")?;
    p.exp_string("> ")?;
    p.send_line("word + \"!\"")?;
    p.exp_string("ember!")?;

    p.send_control('d')?;
    p.exp_eof()?;
    Ok(())
}

#[test]
fn errors_do_not_end_the_session() -> Result<(), Error> {
    let mut p = ember_repl()?;
    p.exp_string("> ")?;

    p.send_line("let total = 40;")?;
    p.exp_string("> ")?;
    p.send_line("total();")?;
    p.exp_string("NotCallable")?;

    p.send_line("total + 2")?;
    p.exp_string("42")?;

    p.send_control('d')?;
    p.exp_eof()?;
    Ok(())
}

#[test]
fn multiline_function_is_defined_across_prompts() -> Result<(), Error> {
    let mut p = ember_repl()?;
    p.exp_string("> ")?;

    p.send_line("fn square(n) {")?;
    p.exp_string("..1 ")?;
    p.send_line("return n * n;")?;
    p.exp_string("..1 ")?;
    p.send_line("}")?;
    p.exp_string("> ")?;
    p.send_line("square(7)")?;
    p.exp_string("49")?;

    p.send_control('d')?;
    p.exp_eof()?;
    Ok(())
}
