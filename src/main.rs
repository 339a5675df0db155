use myshell::Interpreter;

fn main() -> rustyline::Result<()> {
    Interpreter::default().repl()
}
