use serde::Serialize;
use std::{collections::BTreeMap, path::PathBuf, process::Command};

use crate::{
    ApuracaoFormatada, ArquivoLido, ArquivoSped, Estatisticas, Nivel, ProdutoFormatado,
    RelatorioFiscal, ResumoProduto, ResumoValidacao, SpedResult, fmt_decimal, fmt_milhares,
    fmt_moeda, fmt_percentual, get_modelo_do_c100, modelo_com_chave_de_acesso,
};

/// Limpar a tela.
pub fn clear_screen(clear_screen: bool) -> SpedResult<()> {
    if clear_screen {
        if cfg!(target_os = "windows") {
            // 'cls' é um comando interno do 'cmd'.
            Command::new("cmd").args(["/c", "cls"]).status()?;
        } else {
            Command::new("clear").status()?;
        }
    }

    Ok(())
}

/// Exibe a descrição, autoria e versão do programa.
pub fn imprimir_versao_do_programa() {
    let descr = [
        "Este programa analisa arquivos do Sped EFD ICMS/IPI.",
        "Os documentos fiscais (C100) são classificados pelos CFOPs de seus itens (C170).",
        "Devoluções de venda e de compra são validadas pelas regras R1 a R6:",
        "sentido da operação, UF, documento referenciado, mistura de CFOPs, C170 x C190 e finalidade da NF-e.",
        "Em seguida, entradas e saídas são agregadas por produto, fornecedor, CFOP e UF,",
        "e a carga tributária atual é comparada com a simulação do IBS/CBS da Reforma Tributária.",
    ];

    let version = env!("CARGO_PKG_VERSION");

    for line in &descr {
        println!(" {}", line);
    }

    println!("\n versão: {}\n", version);
}

/// Estatísticas da decodificação de um arquivo.
pub fn imprimir_estatisticas(lido: &ArquivoLido) {
    let Estatisticas {
        linhas,
        por_registro,
        desconhecidos,
        orfaos,
        duplicados,
        campos_invalidos,
        aberturas,
    } = &lido.arquivo.estatisticas;

    println!(" --- Arquivo: <{}> ---", lido.caminho.display());

    if let Some(abertura) = &lido.arquivo.registro_0000 {
        println!(
            " {} (CNPJ/CPF {}, UF {})",
            abertura.nome,
            abertura.documento_do_declarante(),
            abertura.uf
        );
    }

    println!(" Linhas lidas: {}", fmt_milhares(*linhas));

    let max_len = por_registro.keys().map(String::len).max().unwrap_or_default();
    for (registro, qtd) in por_registro {
        println!("  registro {:<max_len$} = {:>9}", registro, fmt_milhares(*qtd));
    }

    let avisos = [
        ("registros desconhecidos", *desconhecidos),
        ("registros filhos sem pai", *orfaos),
        ("cadastros duplicados", *duplicados),
        ("campos com conteúdo inválido", *campos_invalidos),
        ("registros 0000 repetidos", aberturas.saturating_sub(1)),
    ];

    for (descricao, qtd) in avisos.iter().filter(|(_, qtd)| *qtd > 0) {
        println!("  {descricao}: {}", fmt_milhares(*qtd));
    }

    println!();
}

/// Documentos agrupados pelo modelo (COD_MOD), com soma acumulada.
pub fn imprimir_informacao_segregada(arquivo: &ArquivoSped, nome: &str) {
    let hash_seg = segregar_por_modelo(arquivo);

    let mut running_sum = 0;

    let max_len = hash_seg
        .keys()
        .map(|codigo| get_modelo_do_c100(codigo).chars().count())
        .max()
        .unwrap_or_default();

    println!(" --- Documentos por modelo: {} ---", nome);

    for (codigo, (qtd, sem_chave)) in &hash_seg {
        let doc_nome = get_modelo_do_c100(codigo);
        running_sum += qtd;

        println!(
            " Número de documentos (modelo {:>2} : {:<max_len$}) = {:>9} ( soma acumulada = {:>9} )",
            codigo,
            doc_nome,
            fmt_milhares(*qtd),
            fmt_milhares(running_sum)
        );

        if *sem_chave > 0 {
            println!(
                "   {} documento(s) sem chave de acesso válida: finNFe não consultável.",
                fmt_milhares(*sem_chave)
            );
        }
    }

    println!();
}

/// Modelo (COD_MOD) -> (documentos, documentos eletrônicos sem chave de 44 dígitos).
fn segregar_por_modelo(arquivo: &ArquivoSped) -> BTreeMap<&str, (usize, usize)> {
    arquivo
        .documentos
        .iter()
        .fold(BTreeMap::new(), |mut acc, doc| {
            let cod_mod = doc.cod_mod.trim();
            let grupo: &mut (usize, usize) = acc.entry(cod_mod).or_default();
            grupo.0 += 1;
            if modelo_com_chave_de_acesso(cod_mod) && !doc.chave_valida() {
                grupo.1 += 1;
            }
            acc
        })
}

/// Contagens da validação e documentos com pendências (com `verbose`, também Info e evidências).
pub fn imprimir_resumo_validacao(resumo: &ResumoValidacao, verbose: bool) {
    println!(" --- Validação de devoluções ---");
    println!(" Documentos analisados: {:>9}", fmt_milhares(resumo.total_documentos));
    println!(" Devoluções:            {:>9}", fmt_milhares(resumo.total_devolucoes));
    println!("   de venda:            {:>9}", fmt_milhares(resumo.devolucoes_venda));
    println!("   de compra:           {:>9}", fmt_milhares(resumo.devolucoes_compra));
    println!("   mistas:              {:>9}", fmt_milhares(resumo.documentos_misto));
    println!(
        " Erros: {} | Alertas: {} | Informações: {}\n",
        fmt_milhares(resumo.total_erros),
        fmt_milhares(resumo.total_alertas),
        fmt_milhares(resumo.total_infos)
    );

    for resultado in resumo.documentos_com_pendencias() {
        println!(
            " Linha {:>7} | doc {} | chave {} | {}",
            resultado.linha,
            resultado.num_doc,
            if resultado.chv_nfe.is_empty() { "-" } else { resultado.chv_nfe.as_str() },
            resultado.tipo_devolucao
        );

        resultado
            .inconsistencias
            .iter()
            .filter(|i| verbose || i.nivel != Nivel::Info)
            .for_each(|i| println!("   {:<6} {}", i.nivel.to_string(), i));

        if verbose {
            resultado
                .evidencias
                .iter()
                .for_each(|evidencia| println!("   evidência: {evidencia}"));
        }
    }

    println!();
}

fn imprimir_produtos(titulo: &str, produtos: &[ResumoProduto]) {
    println!(" --- {titulo} ({} produtos) ---", fmt_milhares(produtos.len()));

    if produtos.is_empty() {
        println!();
        return;
    }

    println!(
        " {:<14} {:<40} {:<8} {:>16} {:>14} {:>16} {:>8} {:>14} {:>14}",
        "Código", "Descrição", "NCM", "Valor bruto", "Tributos", "Líquido", "Redução", "IBS/CBS", "Diferença"
    );

    for p in produtos.iter().map(ProdutoFormatado::from) {
        let descricao: String = p.descricao.chars().take(40).collect();
        println!(
            " {:<14} {:<40} {:<8} {:>16} {:>14} {:>16} {:>8} {:>14} {:>14}",
            p.codigo,
            descricao,
            p.ncm,
            p.valor_bruto,
            p.total_tributos,
            p.valor_liquido,
            p.perc_reducao,
            p.ibs_cbs,
            p.diferenca
        );
    }

    println!();
}

/// Produtos, fornecedores, CFOPs, UFs, ajustes e apuração do relatório fiscal.
pub fn imprimir_relatorio_fiscal(relatorio: &RelatorioFiscal) {
    println!(
        " === Relatório fiscal: {} arquivo(s) ===\n",
        fmt_milhares(relatorio.arquivos)
    );

    imprimir_produtos("Produtos de entrada", &relatorio.produtos_entradas);
    imprimir_produtos(
        &format!("Produtos de saída [{}]", relatorio.fonte_saidas),
        &relatorio.produtos_saidas,
    );

    println!(" --- Fornecedores ---");
    for f in &relatorio.fornecedores {
        println!(
            " {:<18} {:<40} {:<2} {:<22} docs {:>5} | bruto {:>16} | tributos {:>14} | IBS/CBS {:>14}",
            f.cnpj_cpf,
            f.nome.chars().take(40).collect::<String>(),
            f.uf,
            f.regime.to_string(),
            fmt_milhares(f.documentos),
            fmt_decimal(f.totais.valor_bruto, 2),
            fmt_decimal(f.simulacao.total_tributos, 2),
            fmt_decimal(f.simulacao.ibs_cbs, 2),
        );
    }
    println!();

    println!(" --- CFOPs de entrada ---");
    for c in &relatorio.cfops_entradas {
        println!(
            " {} itens {:>7} | bruto {:>16} | carga atual {:>8} | IBS/CBS {:>14}",
            c.cfop,
            fmt_milhares(c.itens),
            fmt_decimal(c.totais.valor_bruto, 2),
            fmt_percentual(c.simulacao.carga_atual),
            fmt_decimal(c.simulacao.ibs_cbs, 2),
        );
    }
    println!();

    println!(" --- UFs de origem ---");
    for u in &relatorio.ufs_entradas {
        println!(
            " {:<3} docs {:>7} | bruto {:>16} | tributos {:>14} | IBS/CBS {:>14}",
            u.uf,
            fmt_milhares(u.documentos),
            fmt_decimal(u.totais.valor_bruto, 2),
            fmt_decimal(u.simulacao.total_tributos, 2),
            fmt_decimal(u.simulacao.ibs_cbs, 2),
        );
    }
    println!();

    if !relatorio.ajustes.is_empty() {
        println!(" --- Ajustes da apuração (E111) ---");
        for a in &relatorio.ajustes {
            println!(" {:<10} {:<50} {:>16}", a.codigo, a.descricao, fmt_decimal(a.valor, 2));
        }
        println!(" Total dos ajustes: {}\n", fmt_moeda(relatorio.total_ajustes));
    }

    let entradas = &relatorio.totais_entradas;
    let saidas = &relatorio.totais_saidas;

    println!(" --- Totais do período ---");
    println!(
        " Entradas: bruto {} | tributos {} | líquido {} | IBS/CBS {} | carga {} -> {}",
        fmt_moeda(entradas.totais.valor_bruto),
        fmt_moeda(entradas.total_tributos),
        fmt_moeda(entradas.valor_liquido),
        fmt_moeda(entradas.ibs_cbs),
        fmt_percentual(entradas.carga_atual),
        fmt_percentual(entradas.carga_reforma),
    );
    println!(
        " Saídas:   bruto {} | tributos {} | líquido {} | IBS/CBS {} | carga {} -> {}\n",
        fmt_moeda(saidas.totais.valor_bruto),
        fmt_moeda(saidas.total_tributos),
        fmt_moeda(saidas.valor_liquido),
        fmt_moeda(saidas.ibs_cbs),
        fmt_percentual(saidas.carga_atual),
        fmt_percentual(saidas.carga_reforma),
    );

    let apuracao = ApuracaoFormatada::from(&relatorio.apuracao);

    println!(" --- Apuração ---");
    println!(" {:<10} {:>20} {:>20}", "", "Atual", "Reforma");
    println!(" {:<10} {:>20} {:>20}", "Débitos", apuracao.debitos_atual, apuracao.debitos_reforma);
    println!(" {:<10} {:>20} {:>20}", "Créditos", apuracao.creditos_atual, apuracao.creditos_reforma);
    println!(" {:<10} {:>20} {:>20}", "Resultado", apuracao.resultado_atual, apuracao.resultado_reforma);
    println!(" {:<10} {:>20} {:>20}\n", "Carga", apuracao.carga_atual, apuracao.carga_reforma);
}

/// Validação de um arquivo, para a saída em JSON.
#[derive(Debug, Serialize)]
pub struct ValidacaoArquivo<'a> {
    pub caminho: &'a PathBuf,
    pub estatisticas: &'a Estatisticas,
    pub validacao: &'a ResumoValidacao,
}

/// Tudo o que foi produzido na execução, para a saída em JSON.
#[derive(Debug, Serialize)]
pub struct ResultadoExecucao<'a> {
    pub arquivos: Vec<ValidacaoArquivo<'a>>,
    pub relatorio: &'a RelatorioFiscal,
}

/// Imprime o valor em JSON formatado na saída padrão.
pub fn imprimir_json<T: Serialize>(valor: &T) -> SpedResult<()> {
    println!("{}", serde_json::to_string_pretty(valor)?);
    Ok(())
}
