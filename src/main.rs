use std::process::ExitCode;

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let (Some(source_path), Some(output_path), None) = (args.next(), args.next(), args.next())
    else {
        eprintln!("usage: littlec <source> <output>");
        return ExitCode::from(2);
    };

    // Every failure mode gets the same single stdout line; an unreadable
    // source or unwritable output has no source line to report.
    let Ok(source) = std::fs::read(&source_path) else {
        println!("Compilation error");
        return ExitCode::FAILURE;
    };

    match littlec::compile(&source) {
        Ok(image) => {
            if std::fs::write(&output_path, image).is_err() {
                println!("Compilation error");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            // Nothing is written to the output path.
            match err.line() {
                Some(line) => println!("Compilation error (line {line})"),
                None => println!("Compilation error"),
            }
            ExitCode::FAILURE
        }
    }
}
