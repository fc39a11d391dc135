fn main() {
    match medqb::run() {
        Ok(Some((correct, total))) => {
            if total > 0 {
                println!(
                    "You got {correct} correct out of {total} ({:.0}%)",
                    correct as f64 / total as f64 * 100.0
                );
            }
        }
        Ok(None) => {}
        Err(err) => eprintln!("{err}"),
    }
}
