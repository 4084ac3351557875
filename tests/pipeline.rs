//! Do arquivo em disco ao relatório: leitura, validação e agregação.

use rust_decimal_macros::dec;
use std::fs;
use tempfile::tempdir;

use sped_devolucoes_reforma::{
    Agregador, Codificacao, Fonte, OpcoesValidacao, ParametrosReforma, Regra, Selecao,
    TabelasCfop, TipoDevolucao, Validador, ler_arquivos_sped, ler_cfops, ler_fin_nfe,
    ler_produtos_externos, ler_reducoes_ncm, search_sped_files,
};

const CHAVE: &str = "35240112345678000190550010000001231000001234";

fn sped_janeiro() -> String {
    let devolucao = format!(
        "|C100|1|0|F1|55|00|1|200|{CHAVE}|15012024|15012024|300,00|0|0|0|300,00|9|0|0|0|300,00|36,00|0|0|0|0|0|0|0|"
    );

    [
        "|0000|017|0|01012024|31012024|CONSTRUTORA EXEMPLO|12345678000190||SP|123|3550308|||A|1|",
        "|0150|F1|FORNECEDOR RJ|1058|98765432000110||456|3304557||RUA|1||CENTRO|",
        "|0200|GESSO|GESSO EM PO|||KG|00|25222000||||18,00||",
        "|C100|0|1|F1|55|00|1|100||10012024|10012024|1000,00|0|0|0|1000,00|9|0|0|0|1000,00|120,00|0|0|0|0|0|0|0|",
        "|C170|1|GESSO||10|KG|1000,00|0|0|000|2102||1000,00|12,00|120,00|0|0|0|||||0|||||||||||||||",
        "|C190|000|2102|12,00|1000,00|1000,00|120,00|0|0|0|0||",
        devolucao.as_str(),
        "|C170|1|GESSO||3|KG|300,00|0|0|000|6202||300,00|12,00|36,00|0|0|0|||||0|||||||||||||||",
        "|C190|000|6202|12,00|300,00|300,00|36,00|0|0|0|0||",
        "|E111|SP020001|Crédito outorgado|50,00|",
        "|9999|10|",
    ]
    .join("\r\n")
}

#[test]
fn do_disco_ao_relatorio() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("SPED-2024-01.txt"), sped_janeiro()).unwrap();
    fs::write(dir.path().join("fin_nfe.csv"), format!("chave;fin_nfe\n{CHAVE};4\n")).unwrap();
    fs::write(dir.path().join("reducoes.csv"), "ncm;percentual\n25222000;40\n").unwrap();

    let arquivos = search_sped_files(dir.path()).unwrap();
    let lidos = ler_arquivos_sped(&arquivos, Codificacao::Latin1).unwrap();
    assert_eq!(lidos.len(), 1);

    let arquivo = &lidos[0].arquivo;
    assert_eq!(arquivo.documentos.len(), 2);
    assert_eq!(arquivo.estatisticas.orfaos, 0);

    // Validação
    let fin_nfe = ler_fin_nfe(&dir.path().join("fin_nfe.csv"), false).unwrap();
    let resumo = Validador::new(TabelasCfop::default(), OpcoesValidacao::default())
        .com_fin_nfe(fin_nfe)
        .validar_arquivo(arquivo);

    assert_eq!(resumo.total_documentos, 2);
    assert_eq!(resumo.total_erros, 0);

    let devolucao = &resumo.resultados[1];
    assert_eq!(devolucao.tipo_devolucao, TipoDevolucao::DevolucaoCompra);
    assert!(devolucao.is_devolucao);
    assert!(!devolucao.possui_regra(Regra::R1));
    assert!(!devolucao.possui_regra(Regra::R5));
    assert!(devolucao.possui_regra(Regra::R6));
    assert!(!resumo.resultados[0].is_devolucao);

    // Relatório fiscal com a redução de NCM do CSV
    let mut parametros = ParametrosReforma::default();
    parametros
        .reducoes_ncm
        .extend(ler_reducoes_ncm(&dir.path().join("reducoes.csv"), false).unwrap());

    let selecao = Selecao {
        cnpj: Some("12345678000190".into()),
        periodo_inicial: "2024-01".parse().ok(),
        periodo_final: "2024-01".parse().ok(),
        agrupar_filiais: false,
    };

    let relatorio = Agregador::new(parametros, selecao).gerar(lidos.iter().map(|l| &l.arquivo));

    assert_eq!(relatorio.arquivos, 1);
    let gesso = &relatorio.produtos_entradas[0];
    assert_eq!(gesso.simulacao.perc_reducao, dec!(40));
    assert_eq!(gesso.simulacao.valor_liquido, dec!(880));
    // 880 * 27 * 0,6 / 100
    assert_eq!(gesso.simulacao.ibs_cbs, dec!(142.56));

    assert_eq!(relatorio.fornecedores[0].uf, "RJ");
    assert_eq!(relatorio.total_ajustes, dec!(50));
    assert_eq!(relatorio.apuracao.debitos_atual, dec!(36));
    assert_eq!(relatorio.apuracao.creditos_atual, dec!(120));
}

#[test]
fn fora_da_selecao_nao_entra_no_relatorio() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("EFD_ICMS.txt");
    fs::write(&path, sped_janeiro()).unwrap();

    let lidos = ler_arquivos_sped(&[path], Codificacao::Windows1252).unwrap();
    let selecao = Selecao {
        periodo_inicial: "2024-02".parse().ok(),
        ..Default::default()
    };

    let relatorio = Agregador::new(ParametrosReforma::default(), selecao)
        .gerar(lidos.iter().map(|l| &l.arquivo));

    assert_eq!(relatorio.arquivos, 0);
    assert!(relatorio.produtos_entradas.is_empty());
}

#[test]
fn cfops_extras_e_produtos_externos() {
    let dir = tempdir().unwrap();
    let cfops = dir.path().join("cfops.csv");
    fs::write(&cfops, "codigo;descricao\n1.949;Devolução especial\n").unwrap();

    let mut tabelas = TabelasCfop::default();
    tabelas.estender_venda(ler_cfops(&cfops, false).unwrap());
    assert!(tabelas.eh_devolucao("1949"));

    let produtos = dir.path().join("produtos.csv");
    fs::write(
        &produtos,
        format!(
            "chave_nfe;codigo;descricao;ncm;cfop;quantidade;valor_total;icms;pis;cofins\n\
             {CHAVE};P1;Cimento;25232910;5102;10;500,00;90,00;8,25;38,00\n"
        ),
    )
    .unwrap();
    let externos = ler_produtos_externos(&produtos, false).unwrap();

    // Sem saídas no Sped: os produtos externos ocupam o quadro de saídas.
    let relatorio = Agregador::default()
        .com_produtos_externos(externos)
        .gerar(std::iter::empty());

    assert_eq!(relatorio.fonte_saidas, Fonte::Externa);
    assert_eq!(relatorio.produtos_saidas[0].totais.valor_bruto, dec!(500));
    assert_eq!(relatorio.produtos_saidas[0].simulacao.total_tributos, dec!(136.25));
    assert_eq!(relatorio.apuracao.debitos_atual, dec!(136.25));
}
