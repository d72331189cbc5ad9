use criterion::{Criterion, criterion_group, criterion_main};
use tmgrammar::{RawGrammar, StateStack, Tokenizer};

fn criterion_benchmark(c: &mut Criterion) {
    let raw_grammar = RawGrammar::load_from_file("src/fixtures/grammars/csharp.tmLanguage.yml").unwrap();
    let compiled_grammar = raw_grammar.compile().unwrap();
    let sample = std::fs::read_to_string("src/fixtures/samples/sample.cs").unwrap();

    c.bench_function("csharp line tokenization", |b| {
        let line = r#"parts.Add($"Hello {_name} #{i + 1}\n"); // greet"#;
        b.iter(|| {
            let mut tokenizer = Tokenizer::new(&compiled_grammar);
            let result = tokenizer.tokenize_line(line, None);
            std::hint::black_box(result);
        })
    });

    c.bench_function("csharp document tokenization", |b| {
        b.iter(|| {
            let mut tokenizer = Tokenizer::new(&compiled_grammar);
            let mut stack: Option<StateStack> = None;
            for line in sample.lines() {
                let result = tokenizer.tokenize_line(line, stack.as_ref());
                stack = Some(result.rule_stack);
            }
            std::hint::black_box(stack);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
