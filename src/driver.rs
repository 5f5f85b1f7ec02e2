use std::fs;

use anyhow::Context;

use crate::cli::Args;
use crate::format::sysrof::parse_object;
use crate::harness::{
    execute, EntryArgument, MemoryInitialization, RunMessage, RunObserver, RunOptions,
    TestDefinition,
};
use crate::layout::{link, LinkedObject};
use crate::sim::Disassembly;

/// Prints disassembly and run messages as they happen.
struct ConsoleObserver {
    disasm: bool,
}

impl RunObserver for ConsoleObserver {
    fn instruction(&mut self, line: &Disassembly) {
        if self.disasm {
            println!("{line}");
        }
    }

    fn message(&mut self, message: &RunMessage) {
        match message {
            RunMessage::Fulfilled(text) => println!("  fulfilled: {text}"),
            RunMessage::Info(text) if self.disasm => println!("  {text}"),
            RunMessage::Info(_) => {}
        }
    }
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let bytes = fs::read(&args.object)
        .with_context(|| format!("failed to read {}", args.object.display()))?;
    let parsed = parse_object(&bytes)
        .with_context(|| format!("failed to parse {}", args.object.display()))?;
    let linked = link(parsed).context("failed to link")?;

    let Some(entry) = args.entry.clone() else {
        print_summary(&linked);
        return Ok(());
    };

    let definition = build_definition(&args, entry.clone())?;
    let options = RunOptions {
        max_instructions: (args.max_instructions != 0).then_some(args.max_instructions),
        disassemble: args.disasm,
    };
    let mut observer = ConsoleObserver { disasm: args.disasm };
    let report = execute(&linked, definition, &options, &mut observer)
        .with_context(|| format!("{entry} failed"))?;

    println!(
        "ok {entry} ({} expectation(s), {} instruction(s))",
        report.fulfilled, report.instructions
    );

    if args.coverage {
        let coverage = report.coverage.report(&linked);
        for (section, start, end) in linked.section_ranges() {
            let touched = (start..end)
                .filter(|a| coverage.get(a).is_some_and(|access| access.any()))
                .count();
            println!(
                "  {:<12} {start:#010x}..{end:#010x} {touched}/{} byte(s)",
                section.name,
                end - start
            );
        }
        println!(
            "coverage: {:.1}%",
            report.coverage.ratio(&linked) * 100.0
        );
    }
    Ok(())
}

/// Integer arguments come before float ones; the two banks are independent
/// so this only matters once arguments spill to the stack.
fn build_definition(args: &Args, entry: String) -> anyhow::Result<TestDefinition> {
    let mut definition = TestDefinition::new(entry)
        .with_args(args.args.iter().copied().map(EntryArgument::Int))
        .with_args(args.float_args.iter().copied().map(EntryArgument::Float))
        .randomize_memory(args.randomize_memory);

    for binding in &args.bindings {
        definition = definition.bind(binding.name.clone(), binding.address);
    }
    for init in &args.inits {
        definition
            .initializations
            .push(MemoryInitialization::new(init.bits, init.address, init.value)?);
    }
    if let Some(value) = args.expected_return {
        definition = definition.should_return(value);
    }
    if let Some(value) = args.float_return {
        definition = definition.should_return_float(value);
    }
    Ok(definition)
}

fn print_summary(linked: &LinkedObject) {
    let object = linked.object();
    println!(
        "module {} ({}), unit {}",
        String::from_utf8_lossy(&object.module.module_name),
        String::from_utf8_lossy(&object.module.cpu_name),
        String::from_utf8_lossy(&object.unit.name)
    );

    println!("sections:");
    for (section, start, end) in linked.section_ranges() {
        println!(
            "  [{}] {:<12} {:?} {start:#010x}..{end:#010x} align {}",
            section.index,
            section.name,
            section.kind(),
            section.alignment
        );
    }

    println!("exports:");
    for export in linked.unit().exports() {
        let address = export.linked_address.unwrap_or(export.offset);
        println!("  {address:#010x} {}", export.name);
    }

    println!("imports:");
    for import in &object.imports {
        println!("  {}", import.name);
    }

    println!("relocations:");
    for section in linked.sections() {
        let base = section.linked_address().unwrap_or(0);
        for relocation in &section.relocations {
            println!(
                "  {:#010x} -> {}{}",
                base.wrapping_add(relocation.address),
                relocation.name,
                if relocation.offset == 0 {
                    String::new()
                } else {
                    format!("+{:#x}", relocation.offset)
                }
            );
        }
        for local in &section.local_relocations_long {
            println!(
                "  {:#010x} -> section {}+{:#x}",
                base.wrapping_add(local.address),
                local.section_index,
                local.target
            );
        }
        for local in &section.local_relocations_short {
            println!(
                "  {:#010x} -> section {} (offset in place)",
                base.wrapping_add(local.address),
                local.section_index
            );
        }
    }

    if !object.warnings.is_empty() {
        println!("warnings:");
        for warning in &object.warnings {
            println!("  {warning}");
        }
    }
}
